use std::ops::Range;

/// A contiguous slice of the input assigned to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Global index of the first entity in the slice.
    pub start_index: usize,
    /// Position of the partition, in `0..partition_count`.
    pub batch_index: usize,
    pub len: usize,
}

impl Partition {
    pub fn range(&self) -> Range<usize> {
        self.start_index..self.start_index + self.len
    }
}

/// Number of partitions for `len` entities over `num_workers` workers.
pub fn partition_count(len: usize, num_workers: usize) -> usize {
    num_workers.max(1).min(len)
}

/// Split `len` entities into `min(num_workers, len)` near-equal contiguous partitions.
///
/// The first `len % count` partitions receive one extra entity.
pub fn partition(len: usize, num_workers: usize) -> Vec<Partition> {
    let count = partition_count(len, num_workers);
    if count == 0 {
        return Vec::new();
    }

    let base = len / count;
    let extra = len % count;
    let mut start_index = 0;
    (0..count)
        .map(|batch_index| {
            let size = base + usize::from(batch_index < extra);
            let partition = Partition {
                start_index,
                batch_index,
                len: size,
            };
            start_index += size;
            partition
        })
        .collect()
}
