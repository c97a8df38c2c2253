use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

/// Live-object counters for one [super::Cpu].
///
/// Every tensor buffer and every [crate::node::Node] registers here on
/// construction and deregisters on drop. Ownership itself is handled by
/// `Arc`; the census only makes the balance observable, so a test can assert
/// that a forward/backward pass released everything it created.
#[derive(Debug, Default)]
pub struct Census {
    buffers: AtomicIsize,
    nodes: AtomicIsize,
    buffers_created: AtomicUsize,
    nodes_created: AtomicUsize,
}

impl Census {
    pub(crate) fn register_buffer(&self) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_buffer(&self) {
        let before = self.buffers.fetch_sub(1, Ordering::Relaxed);
        assert!(before > 0, "tensor buffer released more often than created");
    }

    pub(crate) fn register_node(&self) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_node(&self) {
        let before = self.nodes.fetch_sub(1, Ordering::Relaxed);
        assert!(before > 0, "node released more often than created");
    }

    /// Number of tensor buffers currently alive.
    pub fn live_buffers(&self) -> usize {
        self.buffers.load(Ordering::Relaxed).max(0) as usize
    }

    /// Number of nodes currently alive.
    pub fn live_nodes(&self) -> usize {
        self.nodes.load(Ordering::Relaxed).max(0) as usize
    }

    /// Total number of tensor buffers ever created.
    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::Relaxed)
    }

    /// Total number of nodes ever created.
    pub fn nodes_created(&self) -> usize {
        self.nodes_created.load(Ordering::Relaxed)
    }

    /// A snapshot of the live counters, for comparing before/after a pass.
    pub fn snapshot(&self) -> CensusSnapshot {
        CensusSnapshot {
            buffers: self.live_buffers(),
            nodes: self.live_nodes(),
        }
    }

    /// **Panics** if the live counters differ from `baseline`. A difference
    /// means something created during the pass is still referenced (a leak)
    /// or was released twice.
    pub fn assert_balanced(&self, baseline: CensusSnapshot) {
        let now = self.snapshot();
        assert_eq!(
            now, baseline,
            "unbalanced lifecycle: {now:?} live, expected {baseline:?}"
        );
    }
}

/// Live counts at a point in time. See [Census::snapshot].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CensusSnapshot {
    pub buffers: usize,
    pub nodes: usize,
}
