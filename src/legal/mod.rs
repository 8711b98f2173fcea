//! Court rules, holiday tables, due-date arithmetic and the deadline
//! generators built on them.

pub mod audit;
pub mod cascade;
pub mod dates;
pub mod holidays;
pub mod policy;
pub mod rules;
pub mod timeline;
pub mod triggers;
