pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest,
    ConflictCheckResponse, RescheduleAppointmentRequest,
};
pub use services::{booking::BookingService, conflict::ConflictDetectionService};
