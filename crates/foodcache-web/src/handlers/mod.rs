pub mod bulk;
pub mod foods;
pub mod health;
pub mod search;
