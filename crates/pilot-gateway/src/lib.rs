//! HTTP + WebSocket surface for generating and running browser test scripts.

mod gateway_server;

pub use gateway_server::{
    build_gateway_router, run_gateway_server, GatewayServerConfig, GatewayState,
    GENERATE_TEST_ENDPOINT, RUN_TEST_ENDPOINT, WS_ENDPOINT,
};
