pub mod dto;
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use dto::{NewUser, UserUpdate};
pub use memory::MemoryUserStore;
pub use repo::{PgUserStore, UserStore};
pub use repo_types::{User, UserRole};
pub use services::UserDirectory;
