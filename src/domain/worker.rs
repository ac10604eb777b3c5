use std::fmt;

/// Identity of one supervised background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerDescriptor {
    Watcher,
    Creator { index: u32 },
}

impl WorkerDescriptor {
    /// One watcher followed by creators `1..=creators`, in launch order.
    pub fn fixed_set(creators: u32) -> Vec<Self> {
        std::iter::once(Self::Watcher)
            .chain((1..=creators).map(|index| Self::Creator { index }))
            .collect()
    }

    pub fn is_creator(&self) -> bool {
        matches!(self, Self::Creator { .. })
    }
}

impl fmt::Display for WorkerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watcher => f.write_str("watcher"),
            Self::Creator { index } => write!(f, "creator-{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_set_has_one_watcher_and_indexed_creators() {
        let set = WorkerDescriptor::fixed_set(10);
        assert_eq!(set.len(), 11);
        assert_eq!(set[0], WorkerDescriptor::Watcher);
        let indices: Vec<u32> = set
            .iter()
            .filter_map(|d| match d {
                WorkerDescriptor::Creator { index } => Some(*index),
                WorkerDescriptor::Watcher => None,
            })
            .collect();
        assert_eq!(indices, (1..=10).collect::<Vec<_>>());
        assert_eq!(set[3].to_string(), "creator-3");
    }
}
