pub mod coupon;
pub mod order;

pub use coupon::{DiscountType, Entity as Coupon};
pub use order::{
    CancellationStatus, Entity as Order, OrderItem, OrderItems, OrderStatus, PaymentMethod,
    PaymentStatus, ShippingAddress,
};
