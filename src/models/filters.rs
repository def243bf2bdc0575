use uuid::Uuid;

use super::adherence::DateWindow;
use super::enums::{EventStatus, OwnerType};

#[derive(Debug, Default)]
pub struct EventFilter {
    pub patient_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub owner_type: Option<OwnerType>,
    pub status: Option<EventStatus>,
    pub window: Option<DateWindow>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default)]
pub struct TemplateFilter {
    pub patient_id: Option<Uuid>,
    pub owner_type: Option<OwnerType>,
    pub include_retired: bool,
}
