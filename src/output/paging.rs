#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
    pub total: u64,
    pub count: u64,
    pub offset: u64,
    pub limit: u64,
    pub has_more: bool,
    pub next_offset: Option<u64>,
}

pub fn build_paging(total: u64, count: u64, offset: u64, limit: u64) -> Paging {
    let has_more = offset + count < total;
    let next_offset = if has_more { Some(offset + count) } else { None };

    Paging {
        total,
        count,
        offset,
        limit,
        has_more,
        next_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_paging() {
        let paging = build_paging(100, 10, 0, 10);
        assert!(paging.has_more);
        assert_eq!(paging.next_offset, Some(10));
    }

    #[test]
    fn no_more_pages() {
        let paging = build_paging(10, 10, 0, 10);
        assert!(!paging.has_more);
        assert_eq!(paging.next_offset, None);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let paging = build_paging(3, 0, 10, 50);
        assert!(!paging.has_more);
        assert_eq!(paging.count, 0);
    }
}
