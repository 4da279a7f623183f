pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    AvailabilityError, AvailabilityException, AvailabilityPattern, BookedInterval,
    DayAvailability, ExceptionType, Frequency, FullDayBlockPolicy, PatternWindow,
    ResolvedExceptions, WeekdaySet, DEFAULT_GRID_MINUTES,
};
pub use services::{
    exceptions::ExceptionService, patterns::PatternService, slots::SlotService,
};
