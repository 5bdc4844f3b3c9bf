//! School records carried by the sync layer.
//!
//! Each collection has a typed document and a typed partial patch, so queued
//! operations are matched exhaustively instead of trusting untyped JSON.

use crate::{error::Result, grading::Scores, DocumentId, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Remote collections mirrored by the sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "students")]
    Students,
    #[serde(rename = "classes")]
    Classes,
    #[serde(rename = "assessments")]
    Assessments,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Students,
        Collection::Classes,
        Collection::Assessments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::Classes => "classes",
            Collection::Assessments => "assessments",
        }
    }

    /// Remote document path: `{collection}/{id}`.
    pub fn path(&self, id: &str) -> String {
        format!("{}/{}", self.as_str(), id)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "students" => Ok(Collection::Students),
            "classes" => Ok(Collection::Classes),
            "assessments" => Ok(Collection::Assessments),
            other => Err(Error::UnknownCollection(other.to_string())),
        }
    }
}

/// Document ids end up in `{collection}/{id}` paths.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(Error::InvalidDocumentId(id.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: DocumentId,
    pub school_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl Student {
    pub fn new(
        id: impl Into<DocumentId>,
        school_id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            school_id: school_id.into(),
            class_id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            admission_number: None,
            gender: None,
        }
    }

    pub fn in_class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = Some(class_id.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRoom {
    pub id: DocumentId,
    pub school_id: String,
    pub name: String,
    /// Level such as `JSS1` or `SS3`.
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_teacher_id: Option<String>,
}

impl ClassRoom {
    pub fn new(
        id: impl Into<DocumentId>,
        school_id: impl Into<String>,
        name: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            school_id: school_id.into(),
            name: name.into(),
            level: level.into(),
            form_teacher_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: DocumentId,
    pub school_id: String,
    pub student_id: String,
    pub class_id: String,
    pub subject: String,
    pub term: String,
    pub session: String,
    #[serde(flatten)]
    pub scores: Scores,
}

/// Create payloads, one variant per collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection")]
pub enum Document {
    #[serde(rename = "students")]
    Student(Student),
    #[serde(rename = "classes")]
    ClassRoom(ClassRoom),
    #[serde(rename = "assessments")]
    Assessment(Assessment),
}

impl Document {
    pub fn collection(&self) -> Collection {
        match self {
            Document::Student(_) => Collection::Students,
            Document::ClassRoom(_) => Collection::Classes,
            Document::Assessment(_) => Collection::Assessments,
        }
    }

    pub fn id(&self) -> &DocumentId {
        match self {
            Document::Student(s) => &s.id,
            Document::ClassRoom(c) => &c.id,
            Document::Assessment(a) => &a.id,
        }
    }

    /// Parent id used to filter subscriptions.
    pub fn school_id(&self) -> &str {
        match self {
            Document::Student(s) => &s.school_id,
            Document::ClassRoom(c) => &c.school_id,
            Document::Assessment(a) => &a.school_id,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_document_id(self.id())?;
        if let Document::Assessment(a) = self {
            a.scores.validate()?;
        }
        Ok(())
    }

    /// Field map written to the remote store (no collection tag).
    pub fn to_fields(&self) -> Map<String, Value> {
        let value = match self {
            Document::Student(s) => serde_json::to_value(s),
            Document::ClassRoom(c) => serde_json::to_value(c),
            Document::Assessment(a) => serde_json::to_value(a),
        };
        match value {
            Ok(Value::Object(map)) => map,
            // Plain structs always serialize to objects.
            _ => Map::new(),
        }
    }

    /// Rebuild a typed document from a remote field map.
    ///
    /// Extra fields such as `lastUpdated` are ignored. The id is taken from
    /// the document path when the map does not carry one.
    pub fn from_fields(collection: Collection, id: &str, fields: &Map<String, Value>) -> Result<Self> {
        let mut fields = fields.clone();
        fields
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
        let value = Value::Object(fields);
        Ok(match collection {
            Collection::Students => Document::Student(decode(value)?),
            Collection::Classes => Document::ClassRoom(decode(value)?),
            Collection::Assessments => Document::Assessment(decode(value)?),
        })
    }

    /// Merge a partial patch into this document.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<()> {
        match (self, patch) {
            (Document::Student(doc), Patch::Student(p)) => {
                p.apply(doc);
                Ok(())
            }
            (Document::ClassRoom(doc), Patch::ClassRoom(p)) => {
                p.apply(doc);
                Ok(())
            }
            (Document::Assessment(doc), Patch::Assessment(p)) => {
                let mut next = doc.clone();
                p.apply(&mut next);
                next.scores.validate()?;
                *doc = next;
                Ok(())
            }
            (doc, patch) => Err(Error::CollectionMismatch {
                expected: doc.collection(),
                actual: patch.collection(),
            }),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidDocument(e.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl StudentPatch {
    fn apply(&self, doc: &mut Student) {
        if let Some(v) = &self.class_id {
            doc.class_id = Some(v.clone());
        }
        if let Some(v) = &self.first_name {
            doc.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            doc.last_name = v.clone();
        }
        if let Some(v) = &self.admission_number {
            doc.admission_number = Some(v.clone());
        }
        if let Some(v) = &self.gender {
            doc.gender = Some(v.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRoomPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_teacher_id: Option<String>,
}

impl ClassRoomPatch {
    fn apply(&self, doc: &mut ClassRoom) {
        if let Some(v) = &self.name {
            doc.name = v.clone();
        }
        if let Some(v) = &self.level {
            doc.level = v.clone();
        }
        if let Some(v) = &self.form_teacher_id {
            doc.form_teacher_id = Some(v.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(rename = "firstCA", default, skip_serializing_if = "Option::is_none")]
    pub first_ca: Option<f64>,
    #[serde(rename = "secondCA", default, skip_serializing_if = "Option::is_none")]
    pub second_ca: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam: Option<f64>,
}

impl AssessmentPatch {
    fn apply(&self, doc: &mut Assessment) {
        if let Some(v) = &self.subject {
            doc.subject = v.clone();
        }
        if let Some(v) = &self.term {
            doc.term = v.clone();
        }
        if let Some(v) = &self.session {
            doc.session = v.clone();
        }
        if let Some(v) = self.first_ca {
            doc.scores.first_ca = v;
        }
        if let Some(v) = self.second_ca {
            doc.scores.second_ca = v;
        }
        if let Some(v) = self.exam {
            doc.scores.exam = v;
        }
    }

    /// Range-check only the components present in the patch.
    fn validate(&self) -> Result<()> {
        let probe = Scores::new(
            self.first_ca.unwrap_or(0.0),
            self.second_ca.unwrap_or(0.0),
            self.exam.unwrap_or(0.0),
        );
        probe.validate()
    }
}

/// Partial updates, one variant per collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection")]
pub enum Patch {
    #[serde(rename = "students")]
    Student(StudentPatch),
    #[serde(rename = "classes")]
    ClassRoom(ClassRoomPatch),
    #[serde(rename = "assessments")]
    Assessment(AssessmentPatch),
}

impl Patch {
    pub fn collection(&self) -> Collection {
        match self {
            Patch::Student(_) => Collection::Students,
            Patch::ClassRoom(_) => Collection::Classes,
            Patch::Assessment(_) => Collection::Assessments,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Patch::Assessment(p) => p.validate(),
            _ => Ok(()),
        }
    }

    /// Only the fields that are set.
    pub fn to_fields(&self) -> Map<String, Value> {
        let value = match self {
            Patch::Student(p) => serde_json::to_value(p),
            Patch::ClassRoom(p) => serde_json::to_value(p),
            Patch::Assessment(p) => serde_json::to_value(p),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_fields().is_empty()
    }
}
