mod activity_snapshot;
mod entity_kind;
mod meal_log;
mod outbox_event;
mod progress_entry;
mod workout;
mod workout_template;

pub use activity_snapshot::ActivitySnapshot;
pub use entity_kind::{EntityKind, SyncStatus};
pub use meal_log::{MealItem, MealLog, MealType};
pub use outbox_event::{
    EventStatus, OutboxEvent, OutboxStatistics, DEFAULT_MAX_ATTEMPTS,
};
pub use progress_entry::{ProgressEntry, ProgressMetric, QUANTITY_EPSILON};
pub use workout::WorkoutEntry;
pub use workout_template::{TemplateExercise, WorkoutTemplate};
