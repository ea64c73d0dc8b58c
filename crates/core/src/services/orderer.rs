//! Causal ordering of a chunk's registry events.
//!
//! A mint shows up on-chain as a Transfer from the null address directly
//! followed by a NewURI. Resolve and Sync events need the domain to exist,
//! so mints are applied first, in chain order. The remaining Transfer,
//! Resolve and Sync events are grouped per domain keeping only the last one
//! of each type, then replayed per domain in chain order.

use std::collections::{BTreeMap, HashMap};

use crate::models::{Node, RegistryEventKind};
use crate::ports::{RawEvent, RegistryEventData};

/// One step of the mint phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintStep {
    /// Transfer from the null address paired with the NewURI that follows it.
    Mint { transfer: RawEvent, new_uri: RawEvent },
    /// Transfer from a live owner that happened to precede a NewURI.
    Transfer(RawEvent),
    /// NewURI that no mint Transfer precedes.
    OrphanUri(RawEvent),
}

/// Events of a chunk in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedEvents {
    /// Applied first, sequentially.
    pub mints: Vec<MintStep>,
    /// Last Transfer, Resolve and Sync per domain, sorted by chain position.
    pub latest: BTreeMap<Node, Vec<RawEvent>>,
}

impl OrderedEvents {
    pub fn is_empty(&self) -> bool {
        self.mints.is_empty() && self.latest.is_empty()
    }
}

pub struct EventOrderer;

impl EventOrderer {
    /// Split `events` (already in chain order) into the mint phase and the
    /// per-domain groups.
    pub fn order(events: &[RawEvent]) -> OrderedEvents {
        let (mint_class, rest) = Self::split_mint_class(events);

        OrderedEvents {
            mints: Self::pair_mints(mint_class),
            latest: Self::latest_per_domain(rest),
        }
    }

    /// NewURI events and Transfers directly followed by one are mint-class.
    fn split_mint_class(events: &[RawEvent]) -> (Vec<&RawEvent>, Vec<&RawEvent>) {
        let mut mint_class = Vec::new();
        let mut rest = Vec::new();

        for (index, event) in events.iter().enumerate() {
            let next_is_uri = events
                .get(index + 1)
                .is_some_and(|next| next.kind() == RegistryEventKind::NewUri);

            match event.kind() {
                RegistryEventKind::NewUri => mint_class.push(event),
                RegistryEventKind::Transfer if next_is_uri => mint_class.push(event),
                _ => rest.push(event),
            }
        }

        (mint_class, rest)
    }

    fn pair_mints(mint_class: Vec<&RawEvent>) -> Vec<MintStep> {
        let mut steps = Vec::with_capacity(mint_class.len());
        let mut events = mint_class.into_iter().peekable();

        while let Some(event) = events.next() {
            match &event.data {
                RegistryEventData::Transfer { from, .. } if from.is_zero() => {
                    match events.next_if(|next| next.kind() == RegistryEventKind::NewUri) {
                        Some(new_uri) => steps.push(MintStep::Mint {
                            transfer: event.clone(),
                            new_uri: new_uri.clone(),
                        }),
                        None => steps.push(MintStep::Transfer(event.clone())),
                    }
                }
                RegistryEventData::Transfer { .. } => steps.push(MintStep::Transfer(event.clone())),
                _ => steps.push(MintStep::OrphanUri(event.clone())),
            }
        }

        steps
    }

    fn latest_per_domain(rest: Vec<&RawEvent>) -> BTreeMap<Node, Vec<RawEvent>> {
        let mut latest: HashMap<Node, HashMap<RegistryEventKind, &RawEvent>> = HashMap::new();

        for event in rest {
            let tracked = matches!(
                event.kind(),
                RegistryEventKind::Transfer | RegistryEventKind::Resolve | RegistryEventKind::Sync
            );
            if let (true, Some(node)) = (tracked, event.node()) {
                latest.entry(node).or_default().insert(event.kind(), event);
            }
        }

        latest
            .into_iter()
            .map(|(node, by_kind)| {
                let mut events: Vec<RawEvent> = by_kind.into_values().cloned().collect();
                events.sort_by_key(RawEvent::position);
                (node, events)
            })
            .collect()
    }
}
