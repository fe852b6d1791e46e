use crate::model::EntityKind;
use crate::source::CampaignForm;

/// At most this many columns are synthesized from the campaign form.
pub const MAX_FORM_COLUMNS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    String,
    Text,
    Int,
    Float,
    Bool,
    Json,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: LogicalType,
}

impl Column {
    fn new(name: &str, ty: LogicalType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
        }
    }
}

fn strings(names: &[&str]) -> Vec<Column> {
    names
        .iter()
        .map(|name| Column::new(name, LogicalType::String))
        .collect()
}

/// Column sets for the four entity tables: the fixed base schema, plus the
/// columns synthesized from the campaign form on the contact table.
#[derive(Debug, Clone)]
pub struct TableSchemas {
    pub contact: Vec<Column>,
    pub transaction: Vec<Column>,
    pub connection: Vec<Column>,
    pub recording: Vec<Column>,
}

impl TableSchemas {
    pub fn base() -> Self {
        let mut contact = strings(&[
            "$id",
            "$ref",
            "$version",
            "$campaign_id",
            "$task_id",
            "$task",
            "$status",
            "$status_detail",
            "$phone",
            "$caller_id",
            "$created_date",
            "$entry_date",
            "$follow_up_date",
            "$source",
        ]);
        contact.push(Column::new("$comment", LogicalType::Text));
        contact.extend(strings(&[
            "$error",
            "$trigger",
            "$owner",
            "$recording_url",
            "$recording",
        ]));

        let mut transaction = strings(&[
            "$id",
            "$contact_id",
            "fired",
            "type",
            "task_id",
            "task",
            "status",
            "status_detail",
            "actor",
            "trigger",
            "phone",
            "user",
            "user_loginName",
            "user_branch",
            "user_tenantAlias",
            "dialergroup",
            "dialerdomain",
            "clientaddress",
            "startedFrontend",
            "started",
            "technology",
            "disconnected",
            "result",
        ]);
        transaction.push(Column::new("isHI", LogicalType::Bool));
        transaction.push(Column::new("revoked", LogicalType::Bool));
        transaction.push(Column::new("wrapup_time_sec", LogicalType::Int));
        transaction.push(Column::new("pause_time_sec", LogicalType::Int));
        transaction.push(Column::new("edit_time_sec", LogicalType::Int));

        let connection = strings(&[
            "$id",
            "$transaction_id",
            "type",
            "dialergroup",
            "dialerdomain",
            "clientaddress",
            "phone",
            "actor",
            "fired",
            "startedFrontend",
            "started",
            "technology",
            "connected",
            "disconnected",
            "task_id",
            "user",
        ]);

        let recording = strings(&[
            "$id",
            "$connection_id",
            "callnumber",
            "filename",
            "started",
            "stopped",
            "location",
        ]);

        Self {
            contact,
            transaction,
            connection,
            recording,
        }
    }

    pub fn for_kind(&self, kind: EntityKind) -> &[Column] {
        match kind {
            EntityKind::Contact => &self.contact,
            EntityKind::Transaction => &self.transaction,
            EntityKind::Connection => &self.connection,
            EntityKind::Recording => &self.recording,
        }
    }

    pub fn tables(&self) -> [(&'static str, &[Column]); 4] {
        [
            (EntityKind::Contact.table(), self.contact.as_slice()),
            (EntityKind::Transaction.table(), self.transaction.as_slice()),
            (EntityKind::Connection.table(), self.connection.as_slice()),
            (EntityKind::Recording.table(), self.recording.as_slice()),
        ]
    }

    /// Appends one contact column per user-visible form field: `field`
    /// elements that are neither deleted nor hidden, textareas skipped,
    /// capped at [`MAX_FORM_COLUMNS`]. Existing columns are never touched,
    /// so repeated runs only ever widen the schema.
    pub fn extend_from_form(&mut self, form: &CampaignForm) {
        let mut added = 0;
        for element in &form.form.elements {
            if element.element_type != "field"
                || element.deleted
                || element.state == "hidden"
                || element.field_type == "textarea"
                || element.name.is_empty()
            {
                continue;
            }
            if self.contact.iter().any(|c| c.name == element.name) {
                continue;
            }
            let ty = match element.field_type.as_str() {
                "checkbox" => LogicalType::Bool,
                "number" => LogicalType::Int,
                _ => LogicalType::String,
            };
            self.contact.push(Column::new(&element.name, ty));
            added += 1;
            if added == MAX_FORM_COLUMNS {
                break;
            }
        }
    }
}
