mod normalize;

pub use normalize::{
    normalize_gateway_model, normalize_model, normalize_native_model, Routing,
    DEFAULT_GATEWAY_MODEL, DEFAULT_NATIVE_MODEL,
};
