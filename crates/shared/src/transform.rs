//! Topic-scoped payload transformation.
//!
//! `transform` is pure: it maps a raw broker payload to the reduced projection the
//! viewers render, or passes it through untouched for topics it does not know.
//! `Projection::decode` is the viewer-side inverse, giving each cached message an
//! explicit type instead of a loose JSON value.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::telemetry::{
    InstantActionsData, InstantActionsProjection, OrderData, OrderProjection, StateData,
    StateProjection, VisualizationData, VisualizationProjection,
};

/// Topics with a dedicated projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Visualization,
    State,
    Order,
    InstantActions,
    Other,
}

impl TopicKind {
    pub fn from_topic(topic: &str) -> Self {
        match topic {
            "visualization" => Self::Visualization,
            "state" => Self::State,
            "order" => Self::Order,
            "instantActions" => Self::InstantActions,
            _ => Self::Other,
        }
    }
}

/// A payload could not be decoded with its topic's schema.
#[derive(Debug, Error)]
#[error("malformed payload on topic '{topic}': {source}")]
pub struct TransformError {
    pub topic: String,
    #[source]
    pub source: serde_json::Error,
}

/// Result of a successful transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed {
    /// Reduced projection, serialized as JSON.
    Projected(String),
    /// Raw payload of a topic without a projection.
    PassThrough(String),
}

impl Transformed {
    pub fn into_payload(self) -> String {
        match self {
            Self::Projected(p) | Self::PassThrough(p) => p,
        }
    }
}

/// Map a raw topic payload to its display projection.
pub fn transform(topic: &str, raw: &str) -> Result<Transformed, TransformError> {
    let projected = match TopicKind::from_topic(topic) {
        TopicKind::Visualization => project::<VisualizationData, VisualizationProjection>(topic, raw)?,
        TopicKind::State => project::<StateData, StateProjection>(topic, raw)?,
        TopicKind::Order => project::<OrderData, OrderProjection>(topic, raw)?,
        TopicKind::InstantActions => {
            project::<InstantActionsData, InstantActionsProjection>(topic, raw)?
        }
        TopicKind::Other => return Ok(Transformed::PassThrough(raw.to_string())),
    };
    Ok(Transformed::Projected(projected))
}

fn project<S, P>(topic: &str, raw: &str) -> Result<String, TransformError>
where
    S: DeserializeOwned,
    P: From<S> + Serialize,
{
    let err = |source| TransformError {
        topic: topic.to_string(),
        source,
    };
    let data: S = serde_json::from_str(raw).map_err(err)?;
    serde_json::to_string(&P::from(data)).map_err(err)
}

/// A cached, typed message as held by a viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Visualization(VisualizationProjection),
    State(StateProjection),
    Order(OrderProjection),
    InstantActions(InstantActionsProjection),
    Raw(String),
}

impl Projection {
    /// Decode a relayed payload according to its topic.
    pub fn decode(topic: &str, payload: &str) -> Result<Self, TransformError> {
        let err = |source| TransformError {
            topic: topic.to_string(),
            source,
        };
        Ok(match TopicKind::from_topic(topic) {
            TopicKind::Visualization => Self::Visualization(serde_json::from_str(payload).map_err(err)?),
            TopicKind::State => Self::State(serde_json::from_str(payload).map_err(err)?),
            TopicKind::Order => Self::Order(serde_json::from_str(payload).map_err(err)?),
            TopicKind::InstantActions => {
                Self::InstantActions(serde_json::from_str(payload).map_err(err)?)
            }
            TopicKind::Other => Self::Raw(payload.to_string()),
        })
    }

    pub fn kind(&self) -> TopicKind {
        match self {
            Self::Visualization(_) => TopicKind::Visualization,
            Self::State(_) => TopicKind::State,
            Self::Order(_) => TopicKind::Order,
            Self::InstantActions(_) => TopicKind::InstantActions,
            Self::Raw(_) => TopicKind::Other,
        }
    }

    /// One-line human summary for terminal rendering.
    pub fn summary(&self) -> String {
        match self {
            Self::Visualization(v) => {
                let pos = v
                    .agv_position
                    .as_ref()
                    .map(|p| format!("x={:.2} y={:.2} theta={:.2}", p.x, p.y, p.theta))
                    .unwrap_or_else(|| "no position".to_string());
                let vel = v
                    .velocity
                    .as_ref()
                    .map(|v| format!("v=({:.2},{:.2}) omega={:.2}", v.vx, v.vy, v.omega))
                    .unwrap_or_else(|| "no velocity".to_string());
                format!("{} {}", pos, vel)
            }
            Self::State(s) => {
                let battery = s
                    .battery_state
                    .as_ref()
                    .map(|b| {
                        format!(
                            "battery={:.0}%{}",
                            b.battery_charge,
                            if b.charging { " (charging)" } else { "" }
                        )
                    })
                    .unwrap_or_else(|| "battery=?".to_string());
                format!(
                    "order={} node={} driving={} {} errors={} actions={}",
                    display_or_dash(&s.order_data.order_id),
                    display_or_dash(&s.order_data.last_node_id),
                    s.order_data.driving,
                    battery,
                    s.errors.len(),
                    s.action_states.len()
                )
            }
            Self::Order(o) => format!(
                "order={} update={} nodes={} edges={}",
                display_or_dash(&o.order_id),
                o.order_update_id,
                o.nodes.len(),
                o.edges.len()
            ),
            Self::InstantActions(a) => {
                let types: Vec<&str> = a.actions.iter().map(|a| a.action_type.as_str()).collect();
                format!(
                    "order={} actions=[{}]",
                    display_or_dash(&a.order_id),
                    types.join(", ")
                )
            }
            Self::Raw(raw) => {
                let preview: String = raw.chars().take(60).collect();
                if preview.len() < raw.len() {
                    format!("{}…", preview)
                } else {
                    preview
                }
            }
        }
    }
}

fn display_or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
