/// Hex identifier of a blockchain on the service-node network, e.g. "0021".
pub type BlockchainId = String;

/// Database identifier of a gateway application.
pub type ApplicationId = String;

/// Database identifier of a load balancer.
pub type LoadBalancerId = String;

/// Public key identifying a service node within a session.
pub type NodePublicKey = String;

/// Height of a block on a backend chain.
pub type BlockHeight = u64;

/// Identifier assigned to a single client request, carried through metrics.
pub type RequestId = String;
