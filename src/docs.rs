use crate::api::attendance::{HistoryResponse, RangeReconcileRequest, ReconcileRequest};
use crate::api::device::IngestResponse;
use crate::api::mapping::MappingWriteResponse;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, CheckStatus, RecordSource};
use crate::model::device_mapping::{DevicePair, DeviceUserMapping, UnmappedPair};
use crate::model::punch::{DeviceLog, IngestRequest, IngestSummary, RawPunchEvent};
use crate::model::schedule::PlannedSchedule;
use crate::service::attendance::OverrideRequest;
use crate::service::ingest::EventListResponse;
use crate::service::mapping::{MappingListResponse, UnmappedListResponse, UpsertMapping};
use crate::service::reconcile::ReconcileSummary;
use crate::service::schedule::{AssignShift, AssignmentSummary};
use crate::service::sweeper::SweepSummary;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Attendance API",
        version = "1.0.0",
        description = r#"
## Attendance reconciliation

Turns raw punches from clocking devices into one classified attendance record per
employee and day.

### Flow
- **Devices** push buffered punches to `/device/punches`; redelivery is harmless
- **Mappings** bind a device's user code to an employee
- **Schedules** plan a shift for an employee over a date range
- **Reconciliation** matches punches to planned shifts and classifies each day
- **Sweeper** finalizes days whose shift ended without punches

### Security
Device deliveries use the shared `X-Device-Key` header when one is configured.
Everything else needs a JWT bearer token; HR or Admin roles are required for
writes, employees can read only their own attendance.

All times are stored as UTC instants; shift times are wall-clock times in the
configured business timezone.
"#,
    ),
    paths(
        crate::api::device::ingest_punches,
        crate::api::events::event_list,

        crate::api::attendance::attendance_history,
        crate::api::attendance::override_attendance,
        crate::api::attendance::reconcile,
        crate::api::attendance::reconcile_window,
        crate::api::attendance::run_sweep,

        crate::api::mapping::mapping_list,
        crate::api::mapping::mapping_upsert,
        crate::api::mapping::mapping_delete,
        crate::api::mapping::mapping_unmapped,

        crate::api::schedule::schedule_assign,
        crate::api::schedule::schedule_list
    ),
    components(
        schemas(
            IngestRequest,
            DeviceLog,
            IngestSummary,
            IngestResponse,
            RawPunchEvent,
            EventListResponse,
            AttendanceRecord,
            AttendanceStatus,
            CheckStatus,
            RecordSource,
            HistoryResponse,
            OverrideRequest,
            ReconcileRequest,
            RangeReconcileRequest,
            ReconcileSummary,
            SweepSummary,
            DevicePair,
            DeviceUserMapping,
            UnmappedPair,
            UpsertMapping,
            MappingListResponse,
            UnmappedListResponse,
            MappingWriteResponse,
            PlannedSchedule,
            AssignShift,
            AssignmentSummary
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Device", description = "Punch ingestion and the raw ledger"),
        (name = "Attendance", description = "Attendance history, reconciliation and corrections"),
        (name = "Device mapping", description = "Binding device identities to employees"),
        (name = "Schedule", description = "Planned shifts"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
