/// 两个 region 之间的空隙不超过该值时合并为一次读
pub const DEFAULT_COALESCE_DISTANCE: u64 = 512 << 10;

/// 文件中的一段字节区间 offset-length，length 可以为 0
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Region {
    pub offset: u64,
    pub length: u64,
}

impl Region {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// 区间的结束位置（不包含）
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// 与 other 重叠，或两者之间的空隙不超过 max_gap
    pub fn overlaps_or_touches(&self, other: &Region, max_gap: u64) -> bool {
        let (first, second) = if self.offset <= other.offset { (self, other) } else { (other, self) };
        second.offset <= first.end().saturating_add(max_gap)
    }
}

/// 合并后的一次物理读，members 是被它覆盖的原始 region 下标
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoalescedRead {
    pub offset: u64,
    pub length: u64,
    pub members: Vec<usize>,
}

impl CoalescedRead {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

/// 按 offset 排序后把相邻、重叠或空隙不超过 max_gap 的 region 合并。
/// 输入无需有序，也允许重叠；每个下标恰好出现在一个结果的 members 里。
pub fn coalesce(regions: &[Region], max_gap: u64) -> Vec<CoalescedRead> {
    let mut order: Vec<usize> = (0..regions.len()).collect();
    order.sort_by_key(|&i| (regions[i].offset, regions[i].length));

    let mut reads: Vec<CoalescedRead> = Vec::new();
    for idx in order {
        let region = regions[idx];
        match reads.last_mut() {
            Some(last) if region.offset <= last.end().saturating_add(max_gap) => {
                let end = last.end().max(region.end());
                last.length = end - last.offset;
                last.members.push(idx);
            }
            _ => reads.push(CoalescedRead {
                offset: region.offset,
                length: region.length,
                members: vec![idx],
            }),
        }
    }
    reads
}
