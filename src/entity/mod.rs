pub mod cart_items;
pub mod carts;
pub mod categories;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod user_logs;
pub mod users;

pub use cart_items::Entity as CartItems;
pub use carts::Entity as Carts;
pub use categories::Entity as Categories;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use user_logs::Entity as UserLogs;
pub use users::Entity as Users;
