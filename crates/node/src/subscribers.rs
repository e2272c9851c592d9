//! Domain-graph subscription engine.
//!
//! Maintains subscriptions from peers and standing queries, answers pattern
//! fragments against local state plus peer answers, and propagates answer
//! changes. All outbound communication is collected into [`SideEffects`]
//! and dispatched by the actor after the triggering event's persistence is
//! arranged; in replay mode (`send_replies = false`) state is updated but
//! nothing is emitted and nothing new is journaled.

use strandgraph_types::{DomainGraphNode, DomainIndexEvent, QuineId, SubscriberRef, ids::DgnId};

use crate::index::Subscriber;
use crate::messages::{RoutedMessage, SqOutput};
use crate::registry::DgnRegistry;
use crate::state::NodeState;

/// Messages and journal entries produced by one subscription-engine pass.
#[derive(Debug, Default)]
pub(crate) struct SideEffects {
    /// Domain-index events to journal on this node (records of state
    /// changes the engine already made).
    pub self_events: Vec<DomainIndexEvent>,
    /// Messages bound for peers or standing-query consumers.
    pub routed: Vec<RoutedMessage>,
}

impl SideEffects {
    pub(crate) fn is_empty(&self) -> bool {
        self.self_events.is_empty() && self.routed.is_empty()
    }
}

/// Returns whether applying `event` would change subscription state.
///
/// Mirrors the node-change effect checks: events that would not alter
/// state are filtered out before they reach the journal.
pub(crate) fn domain_index_has_effect(state: &NodeState, event: &DomainIndexEvent) -> bool {
    match event {
        DomainIndexEvent::CreateSubscription { subscriber, dgn_id, related_queries } => {
            match state.subscribers.get(dgn_id) {
                None => true,
                Some(entry) => {
                    !entry.subscribers.contains(subscriber)
                        || !related_queries.is_subset(&entry.related_queries)
                },
            }
        },
        DomainIndexEvent::CancelSubscription { subscriber, dgn_id } => state
            .subscribers
            .get(dgn_id)
            .is_some_and(|entry| entry.subscribers.contains(subscriber)),
        DomainIndexEvent::SubscriptionResult { from, dgn_id, result } => {
            state
                .domain_node_index
                .get(from)
                .and_then(|answers| answers.get(dgn_id))
                .copied()
                != Some(Some(*result))
        },
        DomainIndexEvent::StandingQueryResult { dgn_id, result, .. } => state
            .subscribers
            .get(dgn_id)
            .is_some_and(|entry| entry.last_notification != Some(*result)),
    }
}

/// Applies a domain-index event and runs the subscription reactions it
/// triggers.
///
/// `self_qid` is the id of the node owning `state`. With `send_replies`
/// unset (journal replay), only state is touched.
pub(crate) fn apply_domain_index_event(
    state: &mut NodeState,
    registry: &DgnRegistry,
    self_qid: QuineId,
    event: &DomainIndexEvent,
    send_replies: bool,
    effects: &mut SideEffects,
) {
    match event {
        DomainIndexEvent::CreateSubscription { subscriber, dgn_id, related_queries } => {
            let entry = state.subscribers.entry(*dgn_id).or_default();
            entry.subscribers.insert(*subscriber);
            entry.related_queries.extend(related_queries.iter().copied());

            if let Some(dgn) = registry.get(*dgn_id) {
                state.index.index_dgn(&dgn);
                ensure_subscription_to_domain_edges(state, self_qid, &dgn, send_replies, effects);
                update_answer_and_notify_subscribers(
                    state,
                    self_qid,
                    &dgn,
                    send_replies,
                    effects,
                );
            } else {
                tracing::debug!(dgn = %dgn_id, "subscription to unregistered fragment");
            }
        },

        DomainIndexEvent::CancelSubscription { subscriber, dgn_id } => {
            let Some(entry) = state.subscribers.get_mut(dgn_id) else {
                return;
            };
            entry.subscribers.remove(subscriber);
            if entry.subscribers.is_empty() {
                state.subscribers.remove(dgn_id);
                state.index.remove_subscriber(&Subscriber::DomainNodeIndex { dgn_id: *dgn_id });
                cancel_outbound_subscriptions(state, self_qid, *dgn_id, registry, send_replies, effects);
            }
        },

        DomainIndexEvent::SubscriptionResult { from, dgn_id, result } => {
            state.domain_node_index.entry(*from).or_default().insert(*dgn_id, Some(*result));

            // Re-evaluate every subscribed fragment that depends on the
            // child fragment this peer answered for.
            let dependents: Vec<DomainGraphNode> = state
                .subscribers
                .keys()
                .filter_map(|parent| registry.get(*parent))
                .filter(|parent| parent.required_edges.iter().any(|r| r.child == *dgn_id))
                .collect();
            for parent in dependents {
                update_answer_and_notify_subscribers(
                    state,
                    self_qid,
                    &parent,
                    send_replies,
                    effects,
                );
            }
        },

        DomainIndexEvent::StandingQueryResult { dgn_id, result, .. } => {
            // Journal record of a notification this node already sent;
            // restores `last_notification` on replay.
            if let Some(entry) = state.subscribers.get_mut(dgn_id) {
                entry.last_notification = Some(*result);
            }
        },
    }
}

/// Idempotently ensures outgoing subscriptions for every edge a fragment
/// requires: each matching half-edge's peer is asked to answer for the
/// child fragment, unless already asked.
pub(crate) fn ensure_subscription_to_domain_edges(
    state: &mut NodeState,
    self_qid: QuineId,
    dgn: &DomainGraphNode,
    send_replies: bool,
    effects: &mut SideEffects,
) {
    let related_queries = state
        .subscribers
        .get(&dgn.id)
        .map(|entry| entry.related_queries.clone())
        .unwrap_or_default();

    for requirement in &dgn.required_edges {
        let peers: Vec<QuineId> = state
            .edges
            .iter()
            .filter(|edge| {
                edge.label == requirement.label && edge.direction == requirement.direction
            })
            .map(|edge| edge.peer)
            .collect();

        for peer in peers {
            let answers = state.domain_node_index.entry(peer).or_default();
            if answers.contains_key(&requirement.child) {
                continue;
            }
            // Placeholder until the peer answers.
            answers.insert(requirement.child, None);
            if send_replies {
                effects.routed.push(RoutedMessage::ToNode {
                    to: peer,
                    event: DomainIndexEvent::CreateSubscription {
                        subscriber: SubscriberRef::Node(self_qid),
                        dgn_id: requirement.child,
                        related_queries: related_queries.clone(),
                    },
                });
            }
        }
    }
}

/// Recomputes this node's answer for a fragment and notifies subscribers
/// if the answer changed since the last notification.
pub(crate) fn update_answer_and_notify_subscribers(
    state: &mut NodeState,
    self_qid: QuineId,
    dgn: &DomainGraphNode,
    send_replies: bool,
    effects: &mut SideEffects,
) {
    let answer = state.evaluate_dgn(dgn);
    let Some(entry) = state.subscribers.get_mut(&dgn.id) else {
        return;
    };
    if entry.last_notification == Some(answer) {
        return;
    }
    entry.last_notification = Some(answer);

    if !send_replies {
        return;
    }
    for subscriber in entry.subscribers.clone() {
        match subscriber {
            SubscriberRef::Node(peer) => {
                effects.routed.push(RoutedMessage::ToNode {
                    to: peer,
                    event: DomainIndexEvent::SubscriptionResult {
                        from: self_qid,
                        dgn_id: dgn.id,
                        result: answer,
                    },
                });
            },
            SubscriberRef::Query(query_id) => {
                effects.self_events.push(DomainIndexEvent::StandingQueryResult {
                    query_id,
                    dgn_id: dgn.id,
                    result: answer,
                });
                effects.routed.push(RoutedMessage::SqOutput(SqOutput::DgnResult {
                    query_id,
                    from: self_qid,
                    dgn_id: dgn.id,
                    result: answer,
                }));
            },
        }
    }
}

/// Cancels outgoing subscriptions made on behalf of a fragment whose last
/// local subscriber just left.
fn cancel_outbound_subscriptions(
    state: &mut NodeState,
    self_qid: QuineId,
    dgn_id: DgnId,
    registry: &DgnRegistry,
    send_replies: bool,
    effects: &mut SideEffects,
) {
    let Some(dgn) = registry.get(dgn_id) else {
        return;
    };
    for requirement in &dgn.required_edges {
        let mut peers: Vec<QuineId> = Vec::new();
        for (peer, answers) in &mut state.domain_node_index {
            if answers.remove(&requirement.child).is_some() {
                peers.push(*peer);
            }
        }
        if send_replies {
            for peer in peers {
                effects.routed.push(RoutedMessage::ToNode {
                    to: peer,
                    event: DomainIndexEvent::CancelSubscription {
                        subscriber: SubscriberRef::Node(self_qid),
                        dgn_id: requirement.child,
                    },
                });
            }
        }
    }
    state.domain_node_index.retain(|_, answers| !answers.is_empty());
}
