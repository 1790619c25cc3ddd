// 业务数据库模块
// 司机、乘客、行程记录只通过查询/更新访问，不拥有表结构

pub mod models;
pub mod repositories;

pub use models::{DriverEligibility, MatchAttempt, OverdueDriver};
pub use repositories::{BusinessStore, PgBusinessStore};
