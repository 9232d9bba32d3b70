//! 新名称生成器

use std::collections::HashMap;

/// 按前缀生成唯一的投影名称，例如 `scan_0`、`rid_1`
///
/// 所有前缀共享一个计数器，同一次编译中生成的名称互不相同
#[derive(Debug, Default)]
pub struct PrefixId {
    next: usize,
    issued: HashMap<String, usize>,
}

impl PrefixId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_next_id(&mut self, prefix: &str) -> String {
        let id = self.next;
        self.next += 1;
        *self.issued.entry(prefix.to_string()).or_insert(0) += 1;
        format!("{}_{}", prefix, id)
    }

    /// 某个前缀已经生成的名称数
    pub fn issued(&self, prefix: &str) -> usize {
        self.issued.get(prefix).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_across_prefixes() {
        let mut ids = PrefixId::new();
        assert_eq!(ids.get_next_id("scan"), "scan_0");
        assert_eq!(ids.get_next_id("rid"), "rid_1");
        assert_eq!(ids.get_next_id("scan"), "scan_2");
        assert_eq!(ids.issued("scan"), 2);
        assert_eq!(ids.issued("eval"), 0);
    }
}
