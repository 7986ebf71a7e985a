//! C-callable embedding surface.
//!
//! Thin shim over [`Node`] for embedders linking this crate as a static
//! or shared library. `abcast_node_run` blocks and drives the event loop;
//! every other function returns immediately. Callbacks fire on the event
//! loop thread and must not call back into the node beyond
//! `abcast_node_confirm_append`-style enqueueing from another thread.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use crate::node::{Node, NodeHandle};
use crate::role::Callbacks;

/// C callback table. Null entries are skipped.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct abcast_callbacks_t {
    pub on_append:
        Option<unsafe extern "C" fn(round: u64, payload: *const u8, len: usize, user: *mut c_void)>,
    pub on_commit: Option<unsafe extern "C" fn(round: u64, commit: u64, user: *mut c_void)>,
    pub gained_leadership: Option<unsafe extern "C" fn(user: *mut c_void)>,
    pub lost_leadership: Option<unsafe extern "C" fn(user: *mut c_void)>,
    /// `leader_id` 0 means the leader was lost.
    pub on_leader_change: Option<unsafe extern "C" fn(leader_id: u64, user: *mut c_void)>,
}

/// Append completion: `status` 0 on success, negative on cancellation.
#[allow(non_camel_case_types)]
pub type abcast_append_cb =
    Option<unsafe extern "C" fn(status: c_int, round: u64, commit: u64, user: *mut c_void)>;

struct UserData(*mut c_void);

// The embedder's user pointer travels to the event loop thread; keeping
// it valid and thread-safe is the embedder's contract.
unsafe impl Send for UserData {}

struct CallbackBridge {
    table: abcast_callbacks_t,
    user: UserData,
}

impl Callbacks for CallbackBridge {
    fn on_append(&mut self, round: u64, payload: &[u8]) {
        if let Some(cb) = self.table.on_append {
            unsafe { cb(round, payload.as_ptr(), payload.len(), self.user.0) }
        }
    }

    fn on_commit(&mut self, round: u64, commit: u64) {
        if let Some(cb) = self.table.on_commit {
            unsafe { cb(round, commit, self.user.0) }
        }
    }

    fn gained_leadership(&mut self) {
        if let Some(cb) = self.table.gained_leadership {
            unsafe { cb(self.user.0) }
        }
    }

    fn lost_leadership(&mut self) {
        if let Some(cb) = self.table.lost_leadership {
            unsafe { cb(self.user.0) }
        }
    }

    fn on_leader_change(&mut self, leader: Option<u64>) {
        if let Some(cb) = self.table.on_leader_change {
            unsafe { cb(leader.unwrap_or(0), self.user.0) }
        }
    }
}

/// Opaque node handle.
#[allow(non_camel_case_types)]
pub struct abcast_node_t {
    runtime: tokio::runtime::Runtime,
    node: Node,
    handle: NodeHandle,
}

/// Create a node. Returns null on invalid arguments or if the runtime
/// cannot be built.
#[no_mangle]
pub extern "C" fn abcast_node_create(
    id: u64,
    cluster_size: c_int,
    callbacks: abcast_callbacks_t,
    user: *mut c_void,
) -> *mut abcast_node_t {
    if cluster_size < 1 {
        return ptr::null_mut();
    }
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(_) => return ptr::null_mut(),
    };
    let bridge = CallbackBridge {
        table: callbacks,
        user: UserData(user),
    };
    let node = match Node::new(id, cluster_size as usize, Box::new(bridge)) {
        Ok(node) => node,
        Err(_) => return ptr::null_mut(),
    };
    let handle = node.handle();
    Box::into_raw(Box::new(abcast_node_t {
        runtime,
        node,
        handle,
    }))
}

/// Bind the TCP listener. 0 on success, negative on failure.
///
/// # Safety
/// `node` must be a live pointer from `abcast_node_create`; `address`
/// must be a valid NUL-terminated `host:port` string.
#[no_mangle]
pub unsafe extern "C" fn abcast_node_listen(
    node: *mut abcast_node_t,
    address: *const c_char,
) -> c_int {
    let Some(inner) = node.as_mut() else {
        return -1;
    };
    if address.is_null() {
        return -1;
    }
    let Ok(address) = CStr::from_ptr(address).to_str() else {
        return -1;
    };
    match inner.runtime.block_on(inner.node.listen(address)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Register a peer address to dial once the node runs.
///
/// # Safety
/// Same pointer contracts as [`abcast_node_listen`].
#[no_mangle]
pub unsafe extern "C" fn abcast_node_connect_peer(
    node: *mut abcast_node_t,
    address: *const c_char,
) -> c_int {
    let Some(inner) = node.as_mut() else {
        return -1;
    };
    if address.is_null() {
        return -1;
    }
    let Ok(address) = CStr::from_ptr(address).to_str() else {
        return -1;
    };
    match inner.node.connect_peer(address) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Drive the event loop. Blocks; returns only on fatal error.
///
/// # Safety
/// `node` must be a live pointer from `abcast_node_create`.
#[no_mangle]
pub unsafe extern "C" fn abcast_node_run(node: *mut abcast_node_t) -> c_int {
    let Some(inner) = node.as_mut() else {
        return -1;
    };
    match inner.runtime.block_on(inner.node.run()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Submit one payload for replication. 0 if accepted; negative if this
/// node is not the leader or an append is already in flight (the
/// completion does not fire in that case).
///
/// # Safety
/// `node` must be a live pointer from `abcast_node_create`; `content`
/// must point to `content_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn abcast_node_append(
    node: *mut abcast_node_t,
    content: *const u8,
    content_len: usize,
    cb: abcast_append_cb,
    user: *mut c_void,
) -> c_int {
    let Some(inner) = node.as_mut() else {
        return -1;
    };
    if content.is_null() && content_len > 0 {
        return -1;
    }
    let payload = if content_len == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(content, content_len).to_vec()
    };

    let user = UserData(user);
    let result = inner.handle.append_with(payload, move |outcome| {
        // Force capture of the whole `UserData` wrapper (not just its
        // `*mut c_void` field) so the closure's Send bound comes from
        // `UserData`'s manual impl rather than the raw pointer.
        let user = user;
        let UserData(user) = user;
        if let Some(cb) = cb {
            match outcome {
                Ok(commit) => unsafe { cb(0, commit.round, commit.commit, user) },
                Err(_) => unsafe { cb(-1, 0, 0, user) },
            }
        }
    });
    match result {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

/// Confirm that the payload delivered for `round` is durable.
///
/// # Safety
/// `node` must be a live pointer from `abcast_node_create`.
#[no_mangle]
pub unsafe extern "C" fn abcast_node_confirm_append(
    node: *mut abcast_node_t,
    round: u64,
) -> c_int {
    let Some(inner) = node.as_mut() else {
        return -1;
    };
    inner.handle.confirm_append(round);
    0
}

/// Tear the node down and free it. An append still in flight completes
/// with a failure first.
///
/// # Safety
/// `node` must be a pointer from `abcast_node_create` that has not been
/// destroyed yet; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn abcast_node_destroy(node: *mut abcast_node_t) -> c_int {
    if node.is_null() {
        return -1;
    }
    drop(Box::from_raw(node));
    0
}
