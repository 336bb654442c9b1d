mod helpers;

mod dataset_round_trip;
mod forest_lifecycle;
mod model_rename;
mod pending_feedback;
