//! The capability bundle handed to code running against the host.

use std::fmt;
use std::sync::Arc;

use crate::event_loop::HostHandle;
use crate::fetch::{Fetch, NoFetch};
use crate::func::FuncTable;
use crate::socket::{NoSockets, SocketConnector};

/// Immutable handles to the host loop, its function table and the network
/// capabilities. Cloning is cheap; every clone sees the same host.
#[derive(Clone)]
pub struct Platform {
    host: HostHandle,
    funcs: FuncTable,
    fetch: Arc<dyn Fetch>,
    sockets: Arc<dyn SocketConnector>,
}

impl Platform {
    /// A platform with no network capabilities plugged in.
    pub fn new(host: &HostHandle) -> Self {
        Self::builder(host).build()
    }

    pub fn builder(host: &HostHandle) -> PlatformBuilder {
        PlatformBuilder {
            host: host.clone(),
            funcs: None,
            fetch: None,
            sockets: None,
        }
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn funcs(&self) -> &FuncTable {
        &self.funcs
    }

    pub fn fetch(&self) -> &dyn Fetch {
        self.fetch.as_ref()
    }

    pub fn sockets(&self) -> &dyn SocketConnector {
        self.sockets.as_ref()
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("host", &self.host)
            .field("funcs", &self.funcs)
            .finish_non_exhaustive()
    }
}

pub struct PlatformBuilder {
    host: HostHandle,
    funcs: Option<FuncTable>,
    fetch: Option<Arc<dyn Fetch>>,
    sockets: Option<Arc<dyn SocketConnector>>,
}

impl PlatformBuilder {
    /// Share an existing function table instead of creating a fresh one.
    pub fn funcs(mut self, funcs: FuncTable) -> Self {
        self.funcs = Some(funcs);
        self
    }

    pub fn fetch(mut self, fetch: impl Fetch + 'static) -> Self {
        self.fetch = Some(Arc::new(fetch));
        self
    }

    pub fn sockets(mut self, sockets: impl SocketConnector + 'static) -> Self {
        self.sockets = Some(Arc::new(sockets));
        self
    }

    pub fn build(self) -> Platform {
        let fetch = self
            .fetch
            .unwrap_or_else(|| Arc::new(NoFetch::new(&self.host)));
        let sockets = self.sockets.unwrap_or_else(|| Arc::new(NoSockets));
        Platform {
            host: self.host,
            funcs: self.funcs.unwrap_or_default(),
            fetch,
            sockets,
        }
    }
}
