pub mod request;

pub use request::{
    AccessRequest, DecisionAction, NewAccessRequest, RequestStatus, ResponderIdentity, Settlement,
    StatusView,
};
