use serde::Serialize;

use crate::record::EventRecord;
use crate::store::MemoryStore;

pub const MAX_CHAIN_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainNode {
    #[serde(flatten)]
    pub event: EventRecord,
    pub confidence: f32,
    pub edge_type: String,
    pub causes: Vec<ChainNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalChain {
    pub anchor: EventRecord,
    pub causes: Vec<ChainNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAnchor<'a> {
    Pod {
        pod_name: &'a str,
        namespace: &'a str,
    },
    Event(&'a str),
}

pub fn causal_chain(
    store: &MemoryStore,
    anchor: ChainAnchor<'_>,
) -> rusqlite::Result<Option<CausalChain>> {
    let anchor_event = match anchor {
        ChainAnchor::Event(id) => store.event_by_id(id)?,
        ChainAnchor::Pod {
            pod_name,
            namespace,
        } => store.latest_anchor_event(pod_name, namespace)?,
    };
    let Some(anchor_event) = anchor_event else {
        return Ok(None);
    };
    let causes = expand_causes(store, &anchor_event.id, 0)?;
    Ok(Some(CausalChain {
        anchor: anchor_event,
        causes,
    }))
}

// Depth is checked on every expansion, so the walk stays bounded even
// when the edge graph contains cycles.
fn expand_causes(
    store: &MemoryStore,
    effect_event_id: &str,
    depth: usize,
) -> rusqlite::Result<Vec<ChainNode>> {
    if depth >= MAX_CHAIN_DEPTH {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for link in store.causes_of(effect_event_id)? {
        let causes = expand_causes(store, &link.event.id, depth + 1)?;
        out.push(ChainNode {
            event: link.event,
            confidence: link.confidence,
            edge_type: link.edge_type,
            causes,
        });
    }
    Ok(out)
}
