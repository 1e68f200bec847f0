//! Relation kinds and the include options they generate.
//!
//! A relation field on a collection describes how its target collection
//! joins back to the source. Each [`RelationKind`] knows its own keys and
//! produces the [`IncludeOptions`] the model layer needs to pull the
//! association into an aggregated query:
//!
//! ```text
//! BelongsTo       target.target_key   = source.foreign_key
//! HasOne/HasMany  target.foreign_key  = source.source_key
//! BelongsToMany   through.foreign_key = source.source_key
//!                 target.target_key   = through.other_key
//! BelongsToArray  target.target_key IN source.foreign_key (array column)
//! ```

use inflector::Inflector;

use super::{FieldDef, FieldType};
use crate::sql::{table_col, Dialect, Expr, ExprExt, Join, SqlDialect, TableRef};

/// How an association joins its target collection.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    BelongsTo {
        target: String,
        foreign_key: String,
        target_key: String,
    },
    HasOne {
        target: String,
        foreign_key: String,
        source_key: String,
    },
    HasMany {
        target: String,
        foreign_key: String,
        source_key: String,
    },
    BelongsToMany {
        target: String,
        through: String,
        foreign_key: String,
        other_key: String,
        source_key: String,
        target_key: String,
    },
    BelongsToArray {
        target: String,
        foreign_key: String,
        target_key: String,
    },
}

impl RelationKind {
    /// Build the relation described by a field of `source`, filling in the
    /// platform's default key names. Returns `None` for non-relation fields.
    pub fn from_field(source: &str, field: &FieldDef) -> Option<Self> {
        let name = field.name.as_str();
        let key = |value: &Option<String>, default: String| value.clone().unwrap_or(default);

        let kind = match field.field_type {
            FieldType::BelongsTo => {
                let target_key = key(&field.target_key, "id".into());
                RelationKind::BelongsTo {
                    target: key(&field.target, name.to_plural()),
                    foreign_key: key(
                        &field.foreign_key,
                        format!("{}_{}", name, target_key).to_camel_case(),
                    ),
                    target_key,
                }
            }
            FieldType::HasOne | FieldType::HasMany => {
                let source_key = key(&field.source_key, "id".into());
                let foreign_key = key(
                    &field.foreign_key,
                    format!("{}_{}", source.to_singular(), source_key).to_camel_case(),
                );
                if field.field_type == FieldType::HasOne {
                    RelationKind::HasOne {
                        target: key(&field.target, name.to_plural()),
                        foreign_key,
                        source_key,
                    }
                } else {
                    RelationKind::HasMany {
                        target: key(&field.target, name.to_string()),
                        foreign_key,
                        source_key,
                    }
                }
            }
            FieldType::BelongsToMany => {
                let target = key(&field.target, name.to_string());
                let source_key = key(&field.source_key, "id".into());
                let target_key = key(&field.target_key, "id".into());
                RelationKind::BelongsToMany {
                    through: key(&field.through, format!("{}_{}", source, target)),
                    foreign_key: key(
                        &field.foreign_key,
                        format!("{}_{}", source.to_singular(), source_key).to_camel_case(),
                    ),
                    other_key: key(
                        &field.other_key,
                        format!("{}_{}", target.to_singular(), target_key).to_camel_case(),
                    ),
                    target,
                    source_key,
                    target_key,
                }
            }
            FieldType::BelongsToArray => RelationKind::BelongsToArray {
                target: key(&field.target, name.to_string()),
                foreign_key: key(
                    &field.foreign_key,
                    format!("{}_ids", name.to_singular()).to_camel_case(),
                ),
                target_key: key(&field.target_key, "id".into()),
            },
            _ => return None,
        };
        Some(kind)
    }

    /// Name of the target collection.
    pub fn target(&self) -> &str {
        match self {
            RelationKind::BelongsTo { target, .. }
            | RelationKind::HasOne { target, .. }
            | RelationKind::HasMany { target, .. }
            | RelationKind::BelongsToMany { target, .. }
            | RelationKind::BelongsToArray { target, .. } => target,
        }
    }

    /// Include options for pulling this relation into a query on `source_alias`.
    ///
    /// Associations contribute no selected attributes of their own; many-to-many
    /// relations also suppress the through table's attributes, and array-valued
    /// relations carry their generated join condition.
    pub fn include(
        &self,
        association: &str,
        source_alias: &str,
        target_table: &str,
        through_table: Option<&str>,
        dialect: Dialect,
    ) -> IncludeOptions {
        let mut include = IncludeOptions {
            association: association.to_string(),
            relation: self.clone(),
            target_table: target_table.to_string(),
            attributes: vec![],
            through: None,
            on: None,
        };

        match self {
            RelationKind::BelongsToMany { through, .. } => {
                include.through = Some(ThroughOptions {
                    table: through_table.unwrap_or(through).to_string(),
                    attributes: vec![],
                });
            }
            RelationKind::BelongsToArray { .. } => {
                include.merge(self.generate_include(association, source_alias, dialect));
            }
            _ => {}
        }

        include
    }

    /// Include fragment an array-valued relation generates for itself: the
    /// join condition testing the target key against the source's array column.
    pub fn generate_include(
        &self,
        association: &str,
        source_alias: &str,
        dialect: Dialect,
    ) -> GeneratedInclude {
        match self {
            RelationKind::BelongsToArray {
                foreign_key,
                target_key,
                ..
            } => {
                let array = table_col(source_alias, foreign_key).to_sql(dialect);
                let element = table_col(association, target_key).to_sql(dialect);
                GeneratedInclude {
                    on: Some(Expr::Raw(dialect.array_contains(&array, &element))),
                }
            }
            _ => GeneratedInclude::default(),
        }
    }
}

/// Extra include options produced by a relation itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedInclude {
    pub on: Option<Expr>,
}

/// Options for the join table of a many-to-many include.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughOptions {
    pub table: String,
    pub attributes: Vec<String>,
}

/// An association the model layer must join for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeOptions {
    pub association: String,
    pub relation: RelationKind,
    pub target_table: String,
    /// Attributes selected from the association itself. Always empty: every
    /// needed column is already an explicit attribute of the query.
    pub attributes: Vec<String>,
    pub through: Option<ThroughOptions>,
    /// Custom join condition, set for array-valued relations.
    pub on: Option<Expr>,
}

impl IncludeOptions {
    fn merge(&mut self, generated: GeneratedInclude) {
        if generated.on.is_some() {
            self.on = generated.on;
        }
    }

    /// Alias used for the through table of a many-to-many include.
    pub fn through_alias(&self, through: &ThroughOptions) -> String {
        format!("{}->{}", self.association, through.table)
    }

    /// LEFT JOIN clauses that bring this association into a query on `source_alias`.
    pub fn joins(&self, source_alias: &str, dialect: Dialect) -> Vec<Join> {
        let assoc = self.association.as_str();
        let target = TableRef::new(&self.target_table).with_alias(assoc);

        match &self.relation {
            RelationKind::BelongsTo {
                foreign_key,
                target_key,
                ..
            } => vec![Join::left(
                target,
                table_col(assoc, target_key).eq(table_col(source_alias, foreign_key)),
            )],
            RelationKind::HasOne {
                foreign_key,
                source_key,
                ..
            }
            | RelationKind::HasMany {
                foreign_key,
                source_key,
                ..
            } => vec![Join::left(
                target,
                table_col(assoc, foreign_key).eq(table_col(source_alias, source_key)),
            )],
            RelationKind::BelongsToMany {
                through,
                foreign_key,
                other_key,
                source_key,
                target_key,
                ..
            } => {
                let through = self.through.clone().unwrap_or_else(|| ThroughOptions {
                    table: through.clone(),
                    attributes: vec![],
                });
                let through_alias = self.through_alias(&through);
                vec![
                    Join::left(
                        TableRef::new(&through.table).with_alias(&through_alias),
                        table_col(&through_alias, foreign_key)
                            .eq(table_col(source_alias, source_key)),
                    ),
                    Join::left(
                        target,
                        table_col(assoc, target_key).eq(table_col(&through_alias, other_key)),
                    ),
                ]
            }
            RelationKind::BelongsToArray { .. } => {
                let on = self.on.clone().or_else(|| {
                    self.relation
                        .generate_include(assoc, source_alias, dialect)
                        .on
                });
                match on {
                    Some(on) => vec![Join::left(target, on)],
                    None => vec![],
                }
            }
        }
    }
}
