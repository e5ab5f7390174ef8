pub mod addresses;
pub mod auth;
pub mod cart;
pub mod categories;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod products;
pub mod reviews;
pub mod settings;
pub mod wishlist;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    auth::AuthService,
    config::PricingConfig,
    events::EventSender,
    gateway::PaymentGateway,
    notifications::{ConnectionRegistry, Mailer},
    services::{
        accounts::AccountService,
        addresses::AddressService,
        cart::CartService,
        categories::CategoryService,
        checkout::CheckoutService,
        coupons::CouponService,
        notifications::NotificationService,
        orders::{OrderEffects, OrderService},
        payments::PaymentService,
        pricing::PricingRules,
        products::ProductService,
        reviews::ReviewService,
        settings::SettingsService,
        wishlist::WishlistService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub accounts: Arc<AccountService>,
    pub products: Arc<ProductService>,
    pub categories: Arc<CategoryService>,
    pub cart: Arc<CartService>,
    pub addresses: Arc<AddressService>,
    pub checkout: Arc<CheckoutService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub reviews: Arc<ReviewService>,
    pub wishlist: Arc<WishlistService>,
    pub notifications: Arc<NotificationService>,
    pub settings: Arc<SettingsService>,
}

/// External collaborators the services are wired against. Tests swap the
/// gateway and mailer for fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        auth: Arc<AuthService>,
        pricing: &PricingConfig,
        collaborators: Collaborators,
    ) -> Self {
        let notifications = NotificationService::new(
            db.clone(),
            collaborators.registry.clone(),
            event_sender.clone(),
        );
        let effects = OrderEffects::new(db.clone(), notifications.clone(), collaborators.mailer);

        Self {
            accounts: Arc::new(AccountService::new(db.clone(), auth, event_sender.clone())),
            products: Arc::new(ProductService::new(db.clone(), event_sender.clone())),
            categories: Arc::new(CategoryService::new(db.clone())),
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            addresses: Arc::new(AddressService::new(db.clone())),
            checkout: Arc::new(CheckoutService::new(db.clone(), PricingRules::from(pricing))),
            coupons: Arc::new(CouponService::new(db.clone())),
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                collaborators.gateway.clone(),
                effects.clone(),
                pricing,
            )),
            payments: Arc::new(PaymentService::new(
                db.clone(),
                event_sender.clone(),
                collaborators.gateway,
                effects,
            )),
            reviews: Arc::new(ReviewService::new(db.clone(), event_sender.clone())),
            wishlist: Arc::new(WishlistService::new(db.clone())),
            notifications: Arc::new(notifications),
            settings: Arc::new(SettingsService::new(db)),
        }
    }
}
