use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("design has no routing layers")]
    NoRoutingLayers,
    #[error("die area {0} is empty")]
    EmptyDieArea(String),
    #[error("via '{via}' references cut level {cut}, but only {available} exist")]
    UnknownCutLevel {
        via: String,
        cut: usize,
        available: usize,
    },
    #[error("net '{net}' references unknown layer {layer}")]
    UnknownLayer { net: String, layer: usize },
    #[error("net '{net}' references unknown non-default rule '{ndr}'")]
    UnknownNdr { net: String, ndr: String },
    #[error("non-default rule '{ndr}' has {got} entries, expected one per layer ({expected})")]
    NdrLayerCount {
        ndr: String,
        got: usize,
        expected: usize,
    },
    #[error("pin '{pin}' of net '{net}' has no access points")]
    NoAccessPoints { net: String, pin: String },
}
