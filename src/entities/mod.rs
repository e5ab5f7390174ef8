//! Database entities.

pub mod address;
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod notification;
pub mod order;
pub mod payment;
pub mod product;
pub mod review;
pub mod review_helpful;
pub mod user;
pub mod user_settings;
pub mod wishlist_item;

pub use address::{Entity as Address, Model as AddressModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use coupon::{Entity as Coupon, Model as CouponModel};
pub use notification::{Entity as Notification, Model as NotificationModel};
pub use order::{Entity as Order, Model as OrderModel};
pub use payment::{Entity as Payment, Model as PaymentModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use review::{Entity as Review, Model as ReviewModel};
pub use review_helpful::{Entity as ReviewHelpful, Model as ReviewHelpfulModel};
pub use user::{Entity as User, Model as UserModel};
pub use user_settings::{Entity as UserSettings, Model as UserSettingsModel};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
