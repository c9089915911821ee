/// Group conversations — hub-and-spoke stars over the overlay.
///
/// Each group has one relay acting as hub; failover runs a deterministic
/// election every member computes identically, so no consensus round is
/// needed.
pub mod election;
pub mod manager;
pub mod types;

pub use election::{elect_hub, ElectionReason, ElectionResult};
pub use manager::{GroupEvent, GroupManager};
pub use types::{GroupId, GroupMember, GroupMemberRole, GroupPayload, GroupState, MAX_GROUPS};
