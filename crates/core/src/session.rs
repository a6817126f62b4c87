//! One inspector session per tab, created on first use.
//!
//! Per tab the manager moves through `NoSession -> Attaching -> Active`, and
//! back to `NoSession` when the tab closes or the debugger detaches. Concurrent
//! requests for a tab that is still attaching wait for that attach instead of
//! starting another one. A failed or abandoned attach leaves no slot behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use devcss_protocol::TabId;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dom::SharedDom;
use crate::error::{Error, Result};
use crate::inspector::{Debugger, Inspector, InspectorOptions};

/// The live binding between a tab and its inspector.
pub struct InspectorSession {
	tab: TabId,
	inspector: Box<dyn Inspector>,
	closed: AtomicBool,
}

impl InspectorSession {
	fn new(tab: TabId, inspector: Box<dyn Inspector>) -> Self {
		Self {
			tab,
			inspector,
			closed: AtomicBool::new(false),
		}
	}

	pub fn tab(&self) -> TabId {
		self.tab
	}

	pub fn inspector(&self) -> &dyn Inspector {
		self.inspector.as_ref()
	}

	pub fn document(&self) -> SharedDom {
		self.inspector.document()
	}

	/// Set once the session is torn down; a closed session must not be used.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	fn close(&self) {
		if !self.closed.swap(true, Ordering::AcqRel) {
			self.inspector.release();
		}
	}
}

enum Slot {
	/// The attach in flight is identified by `attempt`; waiters observe the
	/// sender side being dropped when it settles.
	Attaching {
		attempt: u64,
		ready: watch::Receiver<()>,
	},
	Active(Arc<InspectorSession>),
}

#[derive(Default)]
struct State {
	slots: HashMap<TabId, Slot>,
	/// `$0` paths recorded for tabs, used to seed new inspectors.
	selections: HashMap<TabId, String>,
	next_attempt: u64,
}

impl State {
	fn is_attempt(&self, tab: TabId, attempt: u64) -> bool {
		matches!(self.slots.get(&tab), Some(Slot::Attaching { attempt: current, .. }) if *current == attempt)
	}

	fn clear_attempt(&mut self, tab: TabId, attempt: u64) {
		if self.is_attempt(tab, attempt) {
			self.slots.remove(&tab);
		}
	}
}

enum Next {
	Wait(watch::Receiver<()>),
	Attach {
		attempt: u64,
		options: InspectorOptions,
		ready: watch::Sender<()>,
	},
}

pub struct SessionManager {
	debugger: Arc<dyn Debugger>,
	state: Mutex<State>,
}

impl SessionManager {
	pub fn new(debugger: Arc<dyn Debugger>) -> Self {
		Self {
			debugger,
			state: Mutex::new(State::default()),
		}
	}

	pub fn debugger(&self) -> &Arc<dyn Debugger> {
		&self.debugger
	}

	/// The active session for `tab`, if any.
	pub fn get(&self, tab: TabId) -> Option<Arc<InspectorSession>> {
		match self.state.lock().slots.get(&tab) {
			Some(Slot::Active(session)) => Some(Arc::clone(session)),
			_ => None,
		}
	}

	pub fn active_tabs(&self) -> Vec<TabId> {
		let mut tabs: Vec<TabId> = self
			.state
			.lock()
			.slots
			.iter()
			.filter(|(_, slot)| matches!(slot, Slot::Active(_)))
			.map(|(tab, _)| *tab)
			.collect();
		tabs.sort_unstable();
		tabs
	}

	/// Returns the session for `tab`, attaching the debugger first if needed.
	pub async fn get_or_create(&self, tab: TabId) -> Result<Arc<InspectorSession>> {
		loop {
			let next = {
				let mut state = self.state.lock();
				match state.slots.get(&tab) {
					Some(Slot::Active(session)) => return Ok(Arc::clone(session)),
					Some(Slot::Attaching { ready, .. }) => Next::Wait(ready.clone()),
					None => {
						state.next_attempt += 1;
						let attempt = state.next_attempt;
						let (ready, waiters) = watch::channel(());
						state.slots.insert(
							tab,
							Slot::Attaching {
								attempt,
								ready: waiters,
							},
						);
						let options = InspectorOptions {
							selected_xpath: state.selections.get(&tab).cloned(),
						};
						Next::Attach {
							attempt,
							options,
							ready,
						}
					}
				}
			};

			match next {
				Next::Wait(mut ready) => {
					debug!(target = "devcss", tab, "waiting for in-flight attach");
					// Only ever resolves with Err, once the attaching side drops its sender.
					let _ = ready.changed().await;
				}
				Next::Attach {
					attempt,
					options,
					ready,
				} => return self.attach(tab, attempt, options, ready).await,
			}
		}
	}

	async fn attach(
		&self,
		tab: TabId,
		attempt: u64,
		options: InspectorOptions,
		_ready: watch::Sender<()>,
	) -> Result<Arc<InspectorSession>> {
		let mut guard = AttachGuard {
			manager: self,
			tab,
			attempt,
			armed: true,
		};

		let attached = self.debugger.attach(tab).await.map_err(|err| match err {
			err @ Error::Attach { .. } => err,
			other => Error::Attach {
				tab,
				message: other.to_string(),
			},
		});
		let inspector = match attached {
			Ok(()) => match self.debugger.inspect(tab, options).await {
				Ok(inspector) => Ok(inspector),
				Err(err) => {
					if let Err(detach_err) = self.debugger.detach(tab).await {
						debug!(target = "devcss", tab, error = %detach_err, "detach after failed inspect");
					}
					Err(err)
				}
			},
			Err(err) => Err(err),
		};
		guard.armed = false;

		let abandoned = {
			let mut state = self.state.lock();
			let current = state.is_attempt(tab, attempt);
			state.clear_attempt(tab, attempt);

			match inspector {
				Err(err) => {
					warn!(target = "devcss", tab, error = %err, "Failed to create inspector session");
					return Err(err);
				}
				Ok(inspector) if !current => inspector,
				Ok(inspector) => {
					let session = Arc::new(InspectorSession::new(tab, inspector));
					state.slots.insert(tab, Slot::Active(Arc::clone(&session)));
					info!(target = "devcss", tab, "Inspector session attached");
					return Ok(session);
				}
			}
		};
		abandoned.release();
		if let Err(err) = self.debugger.detach(tab).await {
			debug!(target = "devcss", tab, error = %err, "detach after abandoned attach");
		}
		info!(target = "devcss", tab, "Tab went away while attaching");
		Err(Error::SessionClosed(tab))
	}

	/// Records the DevTools selection path for `tab`; a session created later
	/// starts with `$0` pointing at it.
	pub fn record_selection(&self, tab: TabId, xpath: impl Into<String>) {
		self.state.lock().selections.insert(tab, xpath.into());
	}

	/// Handles a closed tab: drops its session and detaches the debugger.
	pub async fn tab_closed(&self, tab: TabId) -> bool {
		self.state.lock().selections.remove(&tab);
		if !self.remove(tab) {
			return false;
		}
		if let Err(err) = self.debugger.detach(tab).await {
			warn!(target = "devcss", tab, error = %err, "Failed to detach debugger from closed tab");
		}
		info!(target = "devcss", tab, "Inspector session closed with its tab");
		true
	}

	/// Handles the debugger detaching on its own (user dismissed it, tab
	/// crashed); the session is dropped without detaching again.
	pub fn debugger_detached(&self, tab: TabId, reason: &str) -> bool {
		let removed = self.remove(tab);
		if removed {
			info!(target = "devcss", tab, reason, "Inspector detached");
		}
		removed
	}

	/// Tears down every session.
	pub fn clear(&self) {
		let slots: Vec<Slot> = self.state.lock().slots.drain().map(|(_, slot)| slot).collect();
		for slot in slots {
			if let Slot::Active(session) = slot {
				session.close();
			}
		}
	}

	fn remove(&self, tab: TabId) -> bool {
		let slot = self.state.lock().slots.remove(&tab);
		match slot {
			Some(Slot::Active(session)) => {
				session.close();
				true
			}
			Some(Slot::Attaching { .. }) => true,
			None => false,
		}
	}
}

/// Clears the attaching slot if the attach future is dropped before settling.
struct AttachGuard<'a> {
	manager: &'a SessionManager,
	tab: TabId,
	attempt: u64,
	armed: bool,
}

impl Drop for AttachGuard<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.manager.state.lock().clear_attempt(self.tab, self.attempt);
		}
	}
}
