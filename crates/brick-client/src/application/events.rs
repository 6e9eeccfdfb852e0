//! Event bus: named publication slots with independent subscribers.
//!
//! The bus is the only way network results reach the rest of the client.  UI,
//! world simulation and the auth flow each subscribe to the slots they care
//! about; the dispatch loop publishes into them.
//!
//! # Lifecycle
//!
//! Build one [`EventBus`] at startup, wrap it in an `Arc`, and pass that to the
//! network manager and every subscriber.  There is no global instance.
//!
//! # Re-entrancy (for beginners)
//!
//! A handler is allowed to subscribe or unsubscribe handlers (including
//! itself) while it is being invoked.  [`EventSlot::invoke`] makes this safe
//! by copying the handler list under the lock, releasing the lock, and then
//! walking the copy.  Changes made during a pass therefore apply from the
//! *next* pass: nothing in the current pass is skipped or run twice, and a
//! handler that touches the slot cannot deadlock on it.
//!
//! Message slots carry [`Decoded`] payloads, so a subscriber can tell which
//! side decoded the message as well as read its fields.
//!
//! Handlers run on the publisher's thread.  A subscriber that needs to run on
//! another thread (a UI thread, say) must forward the event itself, typically
//! over a channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use brick_core::protocol::messages::{
    AuthInitMessage, BannerMessage, BlockPlaceMessage, ChatMessage, Decoded, FailedLoginMessage,
    InitMessage, PlayerJoinMessage, VerifiedMessage,
};
use tracing::trace;

// ── Event arguments ───────────────────────────────────────────────────────────

/// Published once the game server accepts the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectEvent {
    /// Server info sent in the acceptance handshake.
    pub handshake: InitMessage,
}

/// Published when the connection ends, for whatever reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub reason: String,
}

/// Published whenever the transport measures a new round-trip time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyUpdatedEvent {
    pub round_trip: Duration,
}

// ── Slots ─────────────────────────────────────────────────────────────────────

/// Opaque token returned by [`EventSlot::add_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A named publication point with an ordered list of subscribers.
pub struct EventSlot<T> {
    name: &'static str,
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> EventSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Full path of this slot, e.g. `network/game/chat`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Subscribes `handler`.  Handlers run in the order they were added.
    pub fn add_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        trace!(slot = self.name, ?id, "handler added");
        id
    }

    /// Unsubscribes the handler registered under `id`.
    ///
    /// Returns `false` if no such handler is subscribed (already removed, or
    /// the id came from a different slot).
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        match handlers.iter().position(|(h, _)| *h == id) {
            Some(index) => {
                handlers.remove(index);
                trace!(slot = self.name, ?id, "handler removed");
                true
            }
            None => false,
        }
    }

    /// Runs every handler subscribed at the moment of the call, in order.
    pub fn invoke(&self, args: &T) {
        let snapshot: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        trace!(slot = self.name, handlers = snapshot.len(), "invoking");
        for handler in snapshot {
            handler(args);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HandlerId, Handler<T>)>> {
        // A handler panicking during `invoke` never holds this lock, so a
        // poisoned mutex still holds a consistent list.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for EventSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSlot")
            .field("name", &self.name)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

// ── Slot hierarchy ────────────────────────────────────────────────────────────

/// `network/game/*`: events from the connected game server.
#[derive(Debug)]
pub struct GameServerEvents {
    pub connect: EventSlot<ConnectEvent>,
    pub disconnect: EventSlot<DisconnectEvent>,
    pub latency_updated: EventSlot<LatencyUpdatedEvent>,
    pub init: EventSlot<Decoded<InitMessage>>,
    pub banner: EventSlot<Decoded<BannerMessage>>,
    pub player_join: EventSlot<Decoded<PlayerJoinMessage>>,
    pub block_place: EventSlot<Decoded<BlockPlaceMessage>>,
    pub chat: EventSlot<Decoded<ChatMessage>>,
}

/// `network/auth/*`: connectionless replies from the auth service.
#[derive(Debug)]
pub struct AuthServerEvents {
    pub init: EventSlot<Decoded<AuthInitMessage>>,
    pub failed_login: EventSlot<Decoded<FailedLoginMessage>>,
    pub verified: EventSlot<Decoded<VerifiedMessage>>,
}

#[derive(Debug)]
pub struct NetworkEvents {
    pub game: GameServerEvents,
    pub auth: AuthServerEvents,
}

/// The full set of slots.  Construct once and share as `Arc<EventBus>`.
#[derive(Debug)]
pub struct EventBus {
    pub network: NetworkEvents,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            network: NetworkEvents {
                game: GameServerEvents {
                    connect: EventSlot::new("network/game/connect"),
                    disconnect: EventSlot::new("network/game/disconnect"),
                    latency_updated: EventSlot::new("network/game/latency_updated"),
                    init: EventSlot::new("network/game/init"),
                    banner: EventSlot::new("network/game/banner"),
                    player_join: EventSlot::new("network/game/player_join"),
                    block_place: EventSlot::new("network/game/block_place"),
                    chat: EventSlot::new("network/game/chat"),
                },
                auth: AuthServerEvents {
                    init: EventSlot::new("network/auth/init"),
                    failed_login: EventSlot::new("network/auth/failed_login"),
                    verified: EventSlot::new("network/auth/verified"),
                },
            },
        }
    }

    /// Paths of every slot on the bus, in declaration order.
    pub fn slot_names(&self) -> Vec<&'static str> {
        let game = &self.network.game;
        let auth = &self.network.auth;
        vec![
            game.connect.name(),
            game.disconnect.name(),
            game.latency_updated.name(),
            game.init.name(),
            game.banner.name(),
            game.player_join.name(),
            game.block_place.name(),
            game.chat.name(),
            auth.init.name(),
            auth.failed_login.name(),
            auth.verified.name(),
        ]
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn Fn(&u32) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |tag: &'static str| -> Box<dyn Fn(&u32) + Send + Sync> {
            let log = Arc::clone(&log_clone);
            Box::new(move |_: &u32| log.lock().unwrap().push(tag))
        };
        (log, make)
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        // Arrange
        let slot = EventSlot::<u32>::new("test/order");
        let (log, make) = recorder();
        slot.add_handler(make("a"));
        slot.add_handler(make("b"));
        slot.add_handler(make("c"));

        // Act
        slot.invoke(&1);

        // Assert
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_handler_receives_published_args() {
        let slot = EventSlot::<u32>::new("test/args");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        slot.add_handler(move |v: &u32| seen_clone.store(*v as usize, Ordering::SeqCst));

        slot.invoke(&42);

        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_remove_handler_stops_delivery() {
        // Arrange
        let slot = EventSlot::<u32>::new("test/remove");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let id = slot.add_handler(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Act
        assert!(slot.remove_handler(id));
        slot.invoke(&0);

        // Assert
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(slot.handler_count(), 0);
    }

    #[test]
    fn test_remove_unknown_handler_returns_false() {
        let slot = EventSlot::<u32>::new("test/unknown");
        let id = slot.add_handler(|_| {});
        assert!(slot.remove_handler(id));
        assert!(!slot.remove_handler(id), "second removal must report absence");
    }

    #[test]
    fn test_self_unsubscribe_during_invoke_runs_others_exactly_once() {
        // Arrange – three handlers, the middle one removes itself when called.
        let slot = Arc::new(EventSlot::<u32>::new("test/self_remove"));
        let (log, make) = recorder();
        slot.add_handler(make("first"));

        let own_id: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
        let own_id_clone = Arc::clone(&own_id);
        let slot_weak = Arc::downgrade(&slot);
        let log_clone = Arc::clone(&log);
        let id = slot.add_handler(move |_| {
            log_clone.lock().unwrap().push("self");
            if let (Some(slot), Some(id)) = (slot_weak.upgrade(), *own_id_clone.lock().unwrap()) {
                slot.remove_handler(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);
        slot.add_handler(make("third"));

        // Act
        slot.invoke(&0);
        slot.invoke(&0);

        // Assert – first pass runs all three, second pass skips the removed one.
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first", "self", "third", "first", "third"]
        );
    }

    #[test]
    fn test_handler_added_during_invoke_runs_from_next_pass() {
        let slot = Arc::new(EventSlot::<u32>::new("test/add_during"));
        let count = Arc::new(AtomicUsize::new(0));
        let slot_weak = Arc::downgrade(&slot);
        let count_clone = Arc::clone(&count);
        let added = Arc::new(std::sync::atomic::AtomicBool::new(false));
        slot.add_handler(move |_| {
            if !added.swap(true, Ordering::SeqCst) {
                if let Some(slot) = slot_weak.upgrade() {
                    let count = Arc::clone(&count_clone);
                    slot.add_handler(move |_| {
                        count.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }
        });

        slot.invoke(&0);
        assert_eq!(count.load(Ordering::SeqCst), 0, "new handler must not run in the same pass");

        slot.invoke(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bus_lists_every_slot_under_its_origin() {
        let bus = EventBus::new();
        let names = bus.slot_names();

        assert_eq!(names.len(), 11);
        assert_eq!(names.iter().filter(|n| n.starts_with("network/game/")).count(), 8);
        assert_eq!(names.iter().filter(|n| n.starts_with("network/auth/")).count(), 3);
        assert!(names.contains(&"network/auth/init"));
    }
}
