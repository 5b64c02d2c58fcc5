//! Thread-safe registry mapping address patterns to handler callbacks, with dispatch into
//! messages and recursive dispatch into bundles.
//!
//! Grounded on the teacher's concurrency style (`Arc` around shared state, e.g. the socket in the
//! now-superseded `udp.rs`): a single `RwLock` guards the handler tables, and dispatch snapshots
//! handler references out from under the lock before invoking them, so a handler that registers or
//! unregisters another handler cannot deadlock or re-enter the lock.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, RwLock
	}
};

use crate::{
	osc::{OSCMessage, OSCPacket},
	pattern::{self, CompiledPattern}
};

/// A callback invoked for every message whose address matches a registered pattern.
pub type Handler = Arc<dyn Fn(&OSCMessage) + Send + Sync>;

/// An opaque handle returned by [`AddressSpace::register`]. Pass it to
/// [`AddressSpace::unregister`] to detach the handler; unregistering twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle(u64);

struct WildcardBucket {
	pattern: String,
	compiled: CompiledPattern,
	handlers: Vec<(u64, Handler)>
}

enum Location {
	Exact(String),
	Wildcard(String)
}

#[derive(Default)]
struct State {
	exact: HashMap<String, Vec<(u64, Handler)>>,
	wildcard: Vec<WildcardBucket>,
	locations: HashMap<u64, Location>
}

/// A thread-safe `pattern -> handlers` registry with exact/wildcard dispatch, per spec.md §4.4.
pub struct AddressSpace {
	next_handle: AtomicU64,
	state: RwLock<State>
}

impl Default for AddressSpace {
	fn default() -> Self {
		Self::new()
	}
}

impl AddressSpace {
	pub fn new() -> Self {
		AddressSpace { next_handle: AtomicU64::new(0), state: RwLock::new(State::default()) }
	}

	/// Registers `handler` against `pattern`. A pattern containing no OSC meta characters is
	/// classified exact and indexed by a `HashMap` for O(1) lookup; any other pattern is compiled
	/// once and added to the linearly-scanned wildcard list.
	pub fn register<F>(&self, pattern: &str, handler: F) -> RegistrationHandle
	where
		F: Fn(&OSCMessage) + Send + Sync + 'static
	{
		let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
		let handler: Handler = Arc::new(handler);
		let mut state = self.state.write().expect("address space lock poisoned");

		if pattern::is_exact(pattern) {
			state.exact.entry(pattern.to_string()).or_default().push((id, handler));
			state.locations.insert(id, Location::Exact(pattern.to_string()));
		} else {
			match state.wildcard.iter_mut().find(|bucket| bucket.pattern == pattern) {
				Some(bucket) => bucket.handlers.push((id, handler)),
				None => state.wildcard.push(WildcardBucket { pattern: pattern.to_string(), compiled: CompiledPattern::compile(pattern), handlers: vec![(id, handler)] })
			}
			state.locations.insert(id, Location::Wildcard(pattern.to_string()));
		}

		RegistrationHandle(id)
	}

	/// Detaches the handler registered under `handle`. Idempotent: unregistering an already-removed
	/// (or never-issued) handle is a no-op.
	pub fn unregister(&self, handle: RegistrationHandle) {
		let mut state = self.state.write().expect("address space lock poisoned");
		let Some(location) = state.locations.remove(&handle.0) else {
			return;
		};

		match location {
			Location::Exact(pattern) => {
				if let Some(handlers) = state.exact.get_mut(&pattern) {
					handlers.retain(|(id, _)| *id != handle.0);
					if handlers.is_empty() {
						state.exact.remove(&pattern);
					}
				}
			}
			Location::Wildcard(pattern) => {
				if let Some(pos) = state.wildcard.iter().position(|bucket| bucket.pattern == pattern) {
					state.wildcard[pos].handlers.retain(|(id, _)| *id != handle.0);
					if state.wildcard[pos].handlers.is_empty() {
						state.wildcard.remove(pos);
					}
				}
			}
		}
	}

	/// Dispatches a single message: snapshots the matching handlers under the lock, then invokes
	/// them outside it, and returns how many handlers ran.
	pub fn dispatch_message(&self, message: &OSCMessage) -> usize {
		let snapshot = {
			let state = self.state.read().expect("address space lock poisoned");
			let mut handlers: Vec<Handler> = state.exact.get(&message.addr).map(|v| v.iter().map(|(_, h)| h.clone()).collect()).unwrap_or_default();
			handlers.extend(state.wildcard.iter().filter(|bucket| bucket.compiled.matches(&message.addr)).flat_map(|bucket| bucket.handlers.iter().map(|(_, h)| h.clone())));
			handlers
		};

		let count = snapshot.len();
		for handler in snapshot {
			handler(message);
		}
		count
	}

	/// Dispatches a packet: a message dispatches directly, a bundle recurses into its elements and
	/// sums the counts (spec.md §4.4).
	pub fn dispatch_packet(&self, packet: &OSCPacket) -> usize {
		match packet {
			OSCPacket::Message(message) => self.dispatch_message(message),
			OSCPacket::Bundle(bundle) => bundle.content.iter().map(|element| self.dispatch_packet(element)).sum()
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::osc::{OSCBundle, OSCTime};

	fn message(addr: &str) -> OSCMessage {
		OSCMessage { addr: addr.to_string(), args: vec![] }
	}

	#[test]
	fn exact_and_wildcard_both_fire() {
		let space = AddressSpace::new();
		space.register("/eos/out/active/chan", |_| {});
		space.register("/eos/*", |_| {});

		assert_eq!(space.dispatch_message(&message("/eos/out/active/chan")), 2);
		assert_eq!(space.dispatch_message(&message("/eos/ping")), 1);
	}

	#[test]
	fn unregister_is_idempotent_and_detaches() {
		let space = AddressSpace::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let handle = space.register("/a", move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		assert_eq!(space.dispatch_message(&message("/a")), 1);
		space.unregister(handle);
		space.unregister(handle);
		assert_eq!(space.dispatch_message(&message("/a")), 0);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn unregister_unknown_handle_is_a_no_op() {
		let space = AddressSpace::new();
		space.unregister(RegistrationHandle(12345));
	}

	#[test]
	fn bundle_dispatch_recurses_and_sums_counts() {
		let space = AddressSpace::new();
		space.register("/a", |_| {});
		space.register("/b", |_| {});

		let bundle = OSCPacket::Bundle(OSCBundle {
			timetag: OSCTime::IMMEDIATELY,
			content: vec![
				OSCPacket::Message(message("/a")),
				OSCPacket::Bundle(OSCBundle { timetag: OSCTime::IMMEDIATELY, content: vec![OSCPacket::Message(message("/b")), OSCPacket::Message(message("/unknown"))] }),
			]
		});

		assert_eq!(space.dispatch_packet(&bundle), 2);
	}
}
