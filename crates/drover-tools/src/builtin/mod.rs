pub mod coupon;

pub use coupon::UnusedCouponsTool;
