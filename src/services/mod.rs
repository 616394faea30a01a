// Pure transition tables shared by every mutating service
pub mod order_status;

// Order lifecycle
pub mod cancellations;
pub mod orders;

// Discounts and payments
pub mod coupons;
pub mod payments;
