//! Server-side mutex queues.
//!
//! Each named mutex is a FIFO wait queue whose head is the current
//! holder. Granting sends the 200 acquire reply unsettled; the grant
//! delivery settling (the holder settled it when leaving its critical
//! section, or its link terminated) comes back as a
//! [`MutexEvent::Released`] and moves the queue forward. All transitions
//! for an endpoint run on its mutex task, so there is no interleaving
//! between popping a released holder and granting the next.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use fe2o3_amqp_types::{
    messaging::{AmqpValue, Body, MessageId},
    primitives::Value,
};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use super::response::{reply_message, OutboundReply, SettlementWatch};
use crate::constants;

/// Events driving the mutex queues of one server endpoint.
#[derive(Debug)]
pub(crate) enum MutexEvent {
    /// The grant delivery for `seq` settled: the holder released the
    /// lock, or its link terminated.
    Released {
        /// Route of the mutex set.
        path: String,
        /// Mutex name within the set.
        name: String,
        /// Sequence number of the acquire whose grant settled.
        seq: u64,
    },

    /// A queued waiter's `wait_time` elapsed.
    WaitExpired {
        /// Route of the mutex set.
        path: String,
        /// Mutex name within the set.
        name: String,
        /// Sequence number of the expired waiter.
        seq: u64,
    },

    /// Drop the current holder and grant the next waiter. Not issued
    /// under normal operation.
    DropHead {
        /// Route of the mutex set.
        path: String,
        /// Mutex name within the set.
        name: String,
    },
}

/// Channel handles a mutex transition may emit into.
pub(crate) struct MutexCtx<'a> {
    pub(crate) path: &'a str,
    pub(crate) name: &'a str,
    pub(crate) reply_tx: &'a mpsc::UnboundedSender<OutboundReply>,
    pub(crate) events_tx: &'a mpsc::UnboundedSender<MutexEvent>,
}

/// An acquire request as it enters the queue.
pub(crate) struct AcquireRequest {
    pub(crate) correlation_id: Option<MessageId>,
    pub(crate) reply_to: String,
    pub(crate) wait_time: Option<Duration>,
    pub(crate) label: Option<String>,
}

struct Waiter {
    seq: u64,
    correlation_id: Option<MessageId>,
    reply_to: String,
    label: Option<String>,
    wait_timer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("seq", &self.seq)
            .field("reply_to", &self.reply_to)
            .field("label", &self.label)
            .finish()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(timer) = self.wait_timer.take() {
            timer.abort();
        }
    }
}

/// The named mutexes of one route, lazily populated on first acquire.
#[derive(Default)]
pub(crate) struct MutexSet {
    instances: HashMap<String, MutexInstance>,
}

impl MutexSet {
    pub(crate) fn acquire(&mut self, request: AcquireRequest, ctx: &MutexCtx<'_>) {
        self.instances
            .entry(ctx.name.to_string())
            .or_default()
            .acquire(request, ctx);
    }

    pub(crate) fn released(&mut self, seq: u64, ctx: &MutexCtx<'_>) {
        if let Some(instance) = self.instances.get_mut(ctx.name) {
            instance.released(seq, ctx);
        }
    }

    pub(crate) fn wait_expired(&mut self, seq: u64, ctx: &MutexCtx<'_>) {
        if let Some(instance) = self.instances.get_mut(ctx.name) {
            instance.wait_expired(seq, ctx);
        }
    }

    pub(crate) fn drop_head(&mut self, ctx: &MutexCtx<'_>) {
        if let Some(instance) = self.instances.get_mut(ctx.name) {
            instance.drop_head(ctx);
        }
    }
}

/// FIFO wait queue for one named mutex. The head is the holder.
#[derive(Default)]
struct MutexInstance {
    queue: VecDeque<Waiter>,
    next_seq: u64,
}

impl MutexInstance {
    fn acquire(&mut self, request: AcquireRequest, ctx: &MutexCtx<'_>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let mut waiter = Waiter {
            seq,
            correlation_id: request.correlation_id,
            reply_to: request.reply_to,
            label: request.label,
            wait_timer: None,
        };

        let was_empty = self.queue.is_empty();
        if !was_empty {
            // the head never waits, so the timer is armed only for
            // waiters enqueued behind an existing holder
            if let Some(wait_time) = request.wait_time {
                let events_tx = ctx.events_tx.clone();
                let path = ctx.path.to_string();
                let name = ctx.name.to_string();
                waiter.wait_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(wait_time).await;
                    let _ = events_tx.send(MutexEvent::WaitExpired { path, name, seq });
                }));
            }
        }

        self.queue.push_back(waiter);
        if was_empty {
            self.grant(ctx);
        }
    }

    /// Sends the 200 grant to the queue head with a fresh acquisition id.
    fn grant(&mut self, ctx: &MutexCtx<'_>) {
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        if let Some(timer) = head.wait_timer.take() {
            timer.abort();
        }

        let acquisition_id = Uuid::new_v4().to_string();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            mutex = ctx.name,
            acquisition_id = %acquisition_id,
            label = head.label.as_deref().unwrap_or(""),
            "granting mutex"
        );
        #[cfg(feature = "log")]
        log::debug!(
            "granting mutex {} (acquisition_id {}, label {:?})",
            ctx.name,
            acquisition_id,
            head.label
        );

        let message = reply_message(
            &head.reply_to,
            head.correlation_id.clone(),
            constants::STATUS_OK,
            constants::DESCRIPTION_OK,
            Some(&acquisition_id),
            Body::Empty,
        );
        let settlement = SettlementWatch {
            tx: ctx.events_tx.clone(),
            event: MutexEvent::Released {
                path: ctx.path.to_string(),
                name: ctx.name.to_string(),
                seq: head.seq,
            },
        };
        let _ = ctx.reply_tx.send(OutboundReply {
            message,
            settlement: Some(settlement),
        });
    }

    fn released(&mut self, seq: u64, ctx: &MutexCtx<'_>) {
        match self.queue.front() {
            Some(head) if head.seq == seq => {
                self.queue.pop_front();
                self.grant(ctx);
            }
            // a stale settlement for an already dropped grant
            _ => {}
        }
    }

    fn wait_expired(&mut self, seq: u64, ctx: &MutexCtx<'_>) {
        let Some(index) = self.queue.iter().position(|waiter| waiter.seq == seq) else {
            return;
        };
        if index == 0 {
            // became the holder before the expiry event was processed
            return;
        }
        if let Some(waiter) = self.queue.remove(index) {
            let message = reply_message(
                &waiter.reply_to,
                waiter.correlation_id.clone(),
                constants::STATUS_WAIT_TIMEOUT,
                constants::DESCRIPTION_WAIT_TIMEOUT,
                None,
                Body::Value(AmqpValue(Value::from(constants::DESCRIPTION_WAIT_TIMEOUT))),
            );
            let _ = ctx.reply_tx.send(OutboundReply {
                message,
                settlement: None,
            });
        }
    }

    fn drop_head(&mut self, ctx: &MutexCtx<'_>) {
        if let Some(head) = self.queue.pop_front() {
            let message = reply_message(
                &head.reply_to,
                head.correlation_id.clone(),
                constants::STATUS_DROPPED,
                constants::DESCRIPTION_DROPPED,
                None,
                Body::Value(AmqpValue(Value::from(constants::DESCRIPTION_DROPPED))),
            );
            let _ = ctx.reply_tx.send(OutboundReply {
                message,
                settlement: None,
            });
            self.grant(ctx);
        }
    }
}
