// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Useful JSON Schema definitions

use schemars::{
    JsonSchema,
    r#gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
};

/// A network hostname
pub struct Hostname;

impl JsonSchema for Hostname {
    fn schema_name() -> String {
        "Hostname".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        string_with_format(generator, "hostname")
    }
}

/// A PostgreSQL connection URI
pub struct PostgresUri;

impl JsonSchema for PostgresUri {
    fn schema_name() -> String {
        "PostgresUri".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        string_with_format(generator, "uri")
    }
}

fn string_with_format(_gen: &mut SchemaGenerator, format: &str) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        format: Some(format.to_owned()),
        ..SchemaObject::default()
    })
}
