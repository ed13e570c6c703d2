//! Vehicle telemetry schemas and their display projections.
//!
//! Inbound schemas tolerate missing and `null` fields: strings and lists fall back
//! to empty values so downstream consumers never see `null` where text or a list
//! is expected. Unknown fields are ignored; fields of the wrong type are errors.

use serde::{Deserialize, Deserializer, Serialize};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// --- Common ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgvPosition {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
    #[serde(deserialize_with = "null_as_default")]
    pub map_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub map_description: String,
    pub position_initialized: bool,
    pub localization_score: f32,
    pub deviation_range: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
    pub omega: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodePosition {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
    pub allowed_deviation_x_y: f32,
    pub allowed_deviation_theta: f32,
    #[serde(deserialize_with = "null_as_default")]
    pub map_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParameter {
    #[serde(deserialize_with = "null_as_default")]
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Action {
    #[serde(deserialize_with = "null_as_default")]
    pub action_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub blocking_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub result_description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_parameters: Vec<ActionParameter>,
}

// --- visualization ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VisualizationData {
    pub header_id: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub manufacturer: String,
    #[serde(deserialize_with = "null_as_default")]
    pub serial_number: String,
    pub agv_position: Option<AgvPosition>,
    pub velocity: Option<Velocity>,
}

/// Display projection of a `visualization` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VisualizationProjection {
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    pub agv_position: Option<AgvPosition>,
    pub velocity: Option<Velocity>,
}

impl From<VisualizationData> for VisualizationProjection {
    fn from(data: VisualizationData) -> Self {
        Self {
            timestamp: data.timestamp,
            agv_position: data.agv_position,
            velocity: data.velocity,
        }
    }
}

// --- state ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionState {
    #[serde(deserialize_with = "null_as_default")]
    pub action_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub result_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatteryState {
    pub battery_charge: f32,
    pub battery_voltage: f32,
    pub battery_health: f32,
    pub charging: bool,
    pub reach: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reference {
    #[serde(deserialize_with = "null_as_default")]
    pub reference_key: String,
    #[serde(deserialize_with = "null_as_default")]
    pub reference_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub error_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub error_references: Vec<Reference>,
    #[serde(deserialize_with = "null_as_default")]
    pub error_description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub error_hint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub error_level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InfoEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub info_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub info_references: Vec<Reference>,
    #[serde(deserialize_with = "null_as_default")]
    pub info_description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub info_level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateData {
    pub header_id: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub serial_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    pub order_update_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub zone_set_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_node_id: String,
    pub last_node_sequence_id: i64,
    pub driving: bool,
    pub paused: bool,
    pub new_base_request: bool,
    pub distance_since_last_node: f32,
    #[serde(deserialize_with = "null_as_default")]
    pub operating_mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_states: Vec<ActionState>,
    pub battery_state: Option<BatteryState>,
    #[serde(deserialize_with = "null_as_default")]
    pub errors: Vec<ErrorEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub information: Vec<InfoEntry>,
}

/// Order progress as reported inside a `state` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderStatus {
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    pub order_update_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub zone_set_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_node_id: String,
    pub last_node_sequence_id: i64,
    pub driving: bool,
    pub paused: bool,
    pub new_base_request: bool,
    pub distance_since_last_node: f32,
    #[serde(deserialize_with = "null_as_default")]
    pub operating_mode: String,
}

/// Display projection of a `state` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateProjection {
    pub order_data: OrderStatus,
    #[serde(deserialize_with = "null_as_default")]
    pub action_states: Vec<ActionState>,
    pub battery_state: Option<BatteryState>,
    #[serde(deserialize_with = "null_as_default")]
    pub errors: Vec<ErrorEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub information: Vec<InfoEntry>,
}

impl From<StateData> for StateProjection {
    fn from(data: StateData) -> Self {
        Self {
            order_data: OrderStatus {
                timestamp: data.timestamp,
                order_id: data.order_id,
                order_update_id: data.order_update_id,
                zone_set_id: data.zone_set_id,
                last_node_id: data.last_node_id,
                last_node_sequence_id: data.last_node_sequence_id,
                driving: data.driving,
                paused: data.paused,
                new_base_request: data.new_base_request,
                distance_since_last_node: data.distance_since_last_node,
                operating_mode: data.operating_mode,
            },
            action_states: data.action_states,
            battery_state: data.battery_state,
            errors: data.errors,
            information: data.information,
        }
    }
}

// --- order ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    #[serde(deserialize_with = "null_as_default")]
    pub node_id: String,
    pub sequence_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub node_description: String,
    pub released: bool,
    pub node_position: Option<NodePosition>,
    #[serde(deserialize_with = "null_as_default")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Edge {
    #[serde(deserialize_with = "null_as_default")]
    pub edge_id: String,
    pub sequence_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub edge_description: String,
    pub released: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub start_node_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub end_node_id: String,
    pub max_speed: f32,
    #[serde(deserialize_with = "null_as_default")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderData {
    pub header_id: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub serial_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    pub order_update_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub zone_set_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub nodes: Vec<Node>,
    #[serde(deserialize_with = "null_as_default")]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeSummary {
    #[serde(deserialize_with = "null_as_default")]
    pub node_id: String,
    pub sequence_id: i64,
    pub released: bool,
    pub node_position: Option<NodePosition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EdgeSummary {
    #[serde(deserialize_with = "null_as_default")]
    pub edge_id: String,
    pub sequence_id: i64,
    pub released: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub start_node_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub end_node_id: String,
}

/// Display projection of an `order` message: the route graph without actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderProjection {
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    pub order_update_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub zone_set_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub nodes: Vec<NodeSummary>,
    #[serde(deserialize_with = "null_as_default")]
    pub edges: Vec<EdgeSummary>,
}

impl From<OrderData> for OrderProjection {
    fn from(data: OrderData) -> Self {
        Self {
            timestamp: data.timestamp,
            order_id: data.order_id,
            order_update_id: data.order_update_id,
            zone_set_id: data.zone_set_id,
            nodes: data
                .nodes
                .into_iter()
                .map(|n| NodeSummary {
                    node_id: n.node_id,
                    sequence_id: n.sequence_id,
                    released: n.released,
                    node_position: n.node_position,
                })
                .collect(),
            edges: data
                .edges
                .into_iter()
                .map(|e| EdgeSummary {
                    edge_id: e.edge_id,
                    sequence_id: e.sequence_id,
                    released: e.released,
                    start_node_id: e.start_node_id,
                    end_node_id: e.end_node_id,
                })
                .collect(),
        }
    }
}

// --- instantActions ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstantActionsData {
    pub header_id: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub serial_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionSummary {
    #[serde(deserialize_with = "null_as_default")]
    pub action_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub action_parameters: Vec<ActionParameter>,
}

/// Display projection of an `instantActions` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstantActionsProjection {
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub order_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub actions: Vec<ActionSummary>,
}

impl From<InstantActionsData> for InstantActionsProjection {
    fn from(data: InstantActionsData) -> Self {
        Self {
            timestamp: data.timestamp,
            order_id: data.order_id,
            actions: data
                .actions
                .into_iter()
                .map(|a| ActionSummary {
                    action_id: a.action_id,
                    action_type: a.action_type,
                    action_status: a.action_status,
                    action_parameters: a.action_parameters,
                })
                .collect(),
        }
    }
}
