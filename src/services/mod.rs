//! Business logic. Handlers stay thin and call into these services.

// Accounts and profile
pub mod accounts;
pub mod addresses;
pub mod settings;

// Catalog
pub mod categories;
pub mod products;
pub mod reviews;

// Shopping
pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod pricing;
pub mod wishlist;

// Orders and payments
pub mod orders;
pub mod payments;

// Messaging
pub mod notifications;
