use std::fmt::Display;
use std::sync::Arc;

use uuid::Uuid;

/// One connected browser tab.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub(crate) struct Session {
    pub(crate) id: Uuid,
    pub(crate) addr: Arc<String>,
}

impl Session {
    pub(crate) fn new(addr: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr: Arc::new(addr.into()),
        }
    }
}

impl Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.id.simple().to_string();
        write!(f, "{}#{}", self.addr, &id[..8])
    }
}
