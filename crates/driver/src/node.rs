//! Node registration
//!
//! The driver does not expose device nodes itself; it hands a capability
//! set ([`NodeOps`]) to a [`NodeRegistrar`] and gets a minor number back.
//! [`NodeTable`] is the in-process registrar used by the daemon and the
//! tests; anything that can route an open to `Arc<dyn NodeOps>` can stand
//! in for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{DriverError, RegistrarError, Result};
use crate::session::Session;

/// Minor number assigned to a registered node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinorNumber(pub u32);

/// The capability set bound to a node
pub trait NodeOps: Send + Sync {
    /// Open a session against the device behind this node
    fn open(&self) -> Result<Session>;
}

/// Naming and minor range for the driver's nodes
#[derive(Debug, Clone)]
pub struct NodeClass {
    /// Name pattern; `%d` is replaced with the minor number
    pub name: String,
    /// First minor number handed out
    pub minor_base: u32,
    /// Number of minors in the range
    pub minor_count: u32,
}

impl Default for NodeClass {
    fn default() -> Self {
        Self {
            name: crate::NODE_NAME_PATTERN.to_string(),
            minor_base: crate::NODE_MINOR_BASE,
            minor_count: crate::NODE_MINOR_COUNT,
        }
    }
}

/// Where the lifecycle controller registers nodes
pub trait NodeRegistrar: Send + Sync {
    /// Bind `ops` to a free minor and return it
    fn register(
        &self,
        ops: Arc<dyn NodeOps>,
    ) -> std::result::Result<MinorNumber, RegistrarError>;

    /// Release a minor previously returned by [`register`]
    ///
    /// [`register`]: NodeRegistrar::register
    fn deregister(&self, minor: MinorNumber);
}

/// In-process node registrar
///
/// Allocates the lowest free minor in the class range and routes opens to
/// the registered capability set.
pub struct NodeTable {
    class: NodeClass,
    slots: Mutex<HashMap<u32, Arc<dyn NodeOps>>>,
}

impl NodeTable {
    pub fn new(class: NodeClass) -> Self {
        Self {
            class,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn class(&self) -> &NodeClass {
        &self.class
    }

    /// Node name for a minor, e.g. `tin48`
    pub fn node_name(&self, minor: MinorNumber) -> String {
        self.class.name.replace("%d", &minor.0.to_string())
    }

    /// Minors currently bound, in ascending order
    pub fn minors(&self) -> Vec<MinorNumber> {
        let slots = self.slots.lock().unwrap();
        let mut minors: Vec<MinorNumber> = slots.keys().map(|&m| MinorNumber(m)).collect();
        minors.sort();
        minors
    }

    /// Open a session on the node bound to `minor`
    ///
    /// Fails with [`DriverError::NoSuchDevice`] when the minor is unbound,
    /// which is also what a deregistered node resolves to.
    pub fn open(&self, minor: MinorNumber) -> Result<Session> {
        let ops = {
            let slots = self.slots.lock().unwrap();
            slots.get(&minor.0).cloned()
        };
        match ops {
            Some(ops) => ops.open(),
            None => Err(DriverError::NoSuchDevice),
        }
    }
}

impl NodeRegistrar for NodeTable {
    fn register(
        &self,
        ops: Arc<dyn NodeOps>,
    ) -> std::result::Result<MinorNumber, RegistrarError> {
        let mut slots = self.slots.lock().unwrap();
        let minor = (self.class.minor_base
            ..self.class.minor_base.saturating_add(self.class.minor_count))
            .find(|m| !slots.contains_key(m))
            .ok_or(RegistrarError::MinorsExhausted)?;
        slots.insert(minor, ops);
        debug!("minor {} bound to node {}", minor, self.node_name(MinorNumber(minor)));
        Ok(MinorNumber(minor))
    }

    fn deregister(&self, minor: MinorNumber) {
        let mut slots = self.slots.lock().unwrap();
        if slots.remove(&minor.0).is_some() {
            debug!("minor {} released", minor.0);
        } else {
            warn!("deregister of unbound minor {}", minor.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeNode {
        opens: AtomicUsize,
    }

    impl FakeNode {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
            })
        }
    }

    impl NodeOps for FakeNode {
        fn open(&self) -> Result<Session> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::DeviceBusy)
        }
    }

    fn small_table() -> NodeTable {
        NodeTable::new(NodeClass {
            name: "tin%d".to_string(),
            minor_base: 48,
            minor_count: 2,
        })
    }

    #[test]
    fn test_lowest_free_minor_wins() {
        let table = small_table();
        let a = table.register(FakeNode::new()).unwrap();
        let b = table.register(FakeNode::new()).unwrap();
        assert_eq!(a, MinorNumber(48));
        assert_eq!(b, MinorNumber(49));
    }

    #[test]
    fn test_released_minor_is_reused() {
        let table = small_table();
        let a = table.register(FakeNode::new()).unwrap();
        let _b = table.register(FakeNode::new()).unwrap();
        table.deregister(a);
        let c = table.register(FakeNode::new()).unwrap();
        assert_eq!(c, MinorNumber(48));
    }

    #[test]
    fn test_range_exhaustion() {
        let table = small_table();
        table.register(FakeNode::new()).unwrap();
        table.register(FakeNode::new()).unwrap();
        let err = table.register(FakeNode::new()).unwrap_err();
        assert!(matches!(err, RegistrarError::MinorsExhausted));
    }

    #[test]
    fn test_node_name_formats_the_minor() {
        let table = small_table();
        assert_eq!(table.node_name(MinorNumber(48)), "tin48");
    }

    #[test]
    fn test_open_routes_to_bound_ops() {
        let table = small_table();
        let node = FakeNode::new();
        let minor = table.register(node.clone()).unwrap();
        let err = table.open(minor).unwrap_err();
        assert!(matches!(err, DriverError::DeviceBusy));
        assert_eq!(node.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_of_unbound_minor_fails() {
        let table = small_table();
        assert!(matches!(
            table.open(MinorNumber(48)),
            Err(DriverError::NoSuchDevice)
        ));
        let node = FakeNode::new();
        let minor = table.register(node).unwrap();
        table.deregister(minor);
        assert!(matches!(
            table.open(minor),
            Err(DriverError::NoSuchDevice)
        ));
    }
}
