pub mod stream;
pub mod views;

pub use views::DashboardService;
