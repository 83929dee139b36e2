/*!
# llm-host DevKit - test doubles for the host lifecycle

Lets the orchestration be exercised without a chain, a node binary or a network:
- In-memory doubles for every host-core seam, sharing one call log
- `TestHost` harness wiring them into an `Orchestrator` or `AdminService`
- Fake inference node serving `/health` for the real HTTP probe
- Fake chain gateway for the real `GatewayClient`
*/

pub mod doubles;
pub mod fake_gateway;
pub mod fake_node;
pub mod harness;

pub use doubles::{Call, CallLog, ProcessTable};
pub use fake_gateway::FakeGateway;
pub use fake_node::FakeNode;
pub use harness::{drain, register_request, sample_config, TestHost};
