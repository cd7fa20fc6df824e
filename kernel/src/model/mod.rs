pub mod id;
pub mod list;
pub mod reservation;
pub mod tryout;
pub mod user;
