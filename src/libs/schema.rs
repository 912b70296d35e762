// schema.rs
use crate::libs::error::DefinitionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Column types a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    FixedText,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Enumerated,
    Binary,
}

impl FieldKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::FixedText => "CHAR",
            Self::Integer => "INTEGER",
            Self::Float => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Enumerated => "TEXT",
            Self::Binary => "BLOB",
        }
    }
}

impl FromStr for FieldKind {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "text" | "varchar" => Self::Text,
            "fixed_text" | "char" => Self::FixedText,
            "integer" | "int" | "tinyint" => Self::Integer,
            "float" => Self::Float,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            "enumerated" | "enum" | "set" => Self::Enumerated,
            "binary" => Self::Binary,
            _ => return Err(DefinitionError::UnknownKind(s.to_string())),
        };

        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    #[default]
    None,
    Primary,
    Index,
    Unique,
}

impl FromStr for KeyRole {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "primary" => Ok(Self::Primary),
            "index" => Ok(Self::Index),
            "unique" => Ok(Self::Unique),
            _ => Err(DefinitionError::UnknownKeyRole(s.to_string())),
        }
    }
}

/// A column declaration. `name` is filled in when the field is added to a
/// [`TypeDeclaration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub max_length: Option<u32>,
    pub key_role: KeyRole,
    pub auto_increment: bool,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            kind,
            max_length: None,
            key_role: KeyRole::None,
            auto_increment: false,
            nullable: false,
            default: None,
        }
    }

    /// The field synthesized when a record type declares no primary key.
    pub(crate) fn implicit_primary_key() -> Self {
        Self {
            name: "id".to_string(),
            max_length: Some(11),
            ..Self::new(FieldKind::Integer).primary().auto_increment()
        }
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn key(mut self, role: KeyRole) -> Self {
        self.key_role = role;
        self
    }

    pub fn primary(self) -> Self {
        self.key(KeyRole::Primary)
    }

    pub fn unique(self) -> Self {
        self.key(KeyRole::Unique)
    }

    pub fn indexed(self) -> Self {
        self.key(KeyRole::Index)
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn is_primary(&self) -> bool {
        self.key_role == KeyRole::Primary
    }
}

/// Declares a field from its textual kind and key role, rejecting anything
/// outside the fixed enumerations.
///
/// ```
/// use recordmap::{define_field, FieldKind};
///
/// let name = define_field("varchar", None).unwrap().max_length(64);
/// assert_eq!(name.kind, FieldKind::Text);
/// assert!(define_field("uuid", None).is_err());
/// ```
pub fn define_field(kind: &str, key_role: Option<&str>) -> Result<FieldSpec, DefinitionError> {
    let kind = kind.parse::<FieldKind>()?;
    let role = key_role.map(str::parse::<KeyRole>).transpose()?;

    Ok(FieldSpec::new(kind).key(role.unwrap_or_default()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    BelongsTo,
    HasMany,
    ManyToMany,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RelationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs-to",
            Self::HasMany => "has-many",
            Self::ManyToMany => "many-to-many",
        }
    }
}

/// A lazy link to another record type. The target is looked up by name only
/// when the relation is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub kind: RelationKind,
    pub target_type: String,
    pub join_field: Option<String>,
}

impl RelationSpec {
    pub fn new(kind: RelationKind, target_type: impl Into<String>) -> Self {
        Self {
            kind,
            target_type: target_type.into(),
            join_field: None,
        }
    }

    pub fn belongs_to(target_type: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, target_type)
    }

    pub fn has_many(target_type: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, target_type)
    }

    pub fn many_to_many(target_type: impl Into<String>) -> Self {
        Self::new(RelationKind::ManyToMany, target_type)
    }

    pub fn join_field(mut self, field: impl Into<String>) -> Self {
        self.join_field = Some(field.into());
        self
    }
}

/// Everything a caller declares about a record type before it is compiled.
#[derive(Debug, Clone, Default)]
pub struct TypeDeclaration {
    pub name: String,
    pub table: Option<String>,
    pub ordering: Option<String>,
    pub fields: Vec<FieldSpec>,
    pub relations: Vec<(String, RelationSpec)>,
}

impl TypeDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn ordering(mut self, ordering: impl Into<String>) -> Self {
        self.ordering = Some(ordering.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, mut spec: FieldSpec) -> Self {
        spec.name = name.into();
        self.fields.push(spec);
        self
    }

    pub fn relation(mut self, name: impl Into<String>, spec: RelationSpec) -> Self {
        self.relations.push((name.into(), spec));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_accept_canonical_names_and_aliases() {
        assert_eq!("text".parse::<FieldKind>(), Ok(FieldKind::Text));
        assert_eq!("varchar".parse::<FieldKind>(), Ok(FieldKind::Text));
        assert_eq!("char".parse::<FieldKind>(), Ok(FieldKind::FixedText));
        assert_eq!("tinyint".parse::<FieldKind>(), Ok(FieldKind::Integer));
        assert_eq!("set".parse::<FieldKind>(), Ok(FieldKind::Enumerated));
        assert_eq!("DateTime".parse::<FieldKind>(), Ok(FieldKind::DateTime));
    }

    #[test]
    fn unknown_kind_is_a_definition_error() {
        assert_eq!(
            define_field("jsonb", None),
            Err(DefinitionError::UnknownKind("jsonb".into()))
        );
    }

    #[test]
    fn unknown_key_role_is_a_definition_error() {
        assert_eq!(
            define_field("int", Some("foreign")),
            Err(DefinitionError::UnknownKeyRole("foreign".into()))
        );
    }

    #[test]
    fn define_field_applies_key_role() {
        let spec = define_field("int", Some("primary")).unwrap().auto_increment();
        assert!(spec.is_primary());
        assert!(spec.auto_increment);
        assert!(!spec.nullable);
    }

    #[test]
    fn declaration_names_its_fields() {
        let decl = TypeDeclaration::new("Book")
            .field("title", FieldSpec::new(FieldKind::Text))
            .relation("publisher", RelationSpec::belongs_to("Publisher"));

        assert_eq!(decl.fields[0].name, "title");
        assert_eq!(decl.relations[0].0, "publisher");
        assert_eq!(decl.relations[0].1.join_field, None);
    }
}
