pub mod member;

pub use member::{
    parse_age, parse_member_id, Member, NewMember, UpdateMemberRequest, ValidationError,
};
