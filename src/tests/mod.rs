use std::sync::Arc;

use serde_json::{Value, json};

use crate::schema::{SchemaNode, SchemaRegistry};

mod bridge;
mod config;
mod framer;
mod transport;

pub(crate) fn schema_from_json(value: Value) -> SchemaNode {
    match serde_json::from_value(value) {
        Ok(schema) => schema,
        Err(error) => panic!("test schema must parse: {error}"),
    }
}

pub(crate) fn registry_with(schemas: Vec<Value>) -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::default();
    for schema in schemas {
        assert!(registry.insert(schema_from_json(schema)));
    }
    Arc::new(registry)
}

/// The core services identification report, the message the whole bridge is
/// usually tried out with first.
pub(crate) fn report_identification_schema() -> Value {
    json!({
        "title": "ReportIdentification",
        "messageId": "4b00",
        "type": "object",
        "required": ["HeaderRec", "ReportIdentificationRec"],
        "properties": {
            "HeaderRec": {
                "type": "object",
                "required": ["MessageID"],
                "properties": {
                    "MessageID": {
                        "type": "string",
                        "const": "4b00",
                        "jausType": "unsigned short integer"
                    }
                }
            },
            "ReportIdentificationRec": {
                "type": "object",
                "required": ["QueryType", "Type", "Identification"],
                "properties": {
                    "QueryType": {
                        "type": "string",
                        "jausType": "unsigned byte",
                        "enum": [
                            "Reserved",
                            "System Identification",
                            "Subsystem Identification",
                            "Node Identification",
                            "Component Identification"
                        ],
                        "valueSet": [
                            {"valueEnum": {"enumIndex": 0, "enumConst": "Reserved"}},
                            {"valueEnum": {"enumIndex": 1, "enumConst": "System Identification"}},
                            {"valueEnum": {"enumIndex": 2, "enumConst": "Subsystem Identification"}},
                            {"valueEnum": {"enumIndex": 3, "enumConst": "Node Identification"}},
                            {"valueEnum": {"enumIndex": 4, "enumConst": "Component Identification"}}
                        ]
                    },
                    "Type": {
                        "type": "string",
                        "jausType": "unsigned short integer",
                        "enum": ["VEHICLE", "OCU", "OTHER_SUBSYSTEM", "NODE", "PAYLOAD", "COMPONENT"],
                        "valueSet": [
                            {"valueEnum": {"enumIndex": 10001, "enumConst": "VEHICLE"}},
                            {"valueEnum": {"enumIndex": 20001, "enumConst": "OCU"}},
                            {"valueEnum": {"enumIndex": 30001, "enumConst": "OTHER_SUBSYSTEM"}},
                            {"valueEnum": {"enumIndex": 40001, "enumConst": "NODE"}},
                            {"valueEnum": {"enumIndex": 50001, "enumConst": "PAYLOAD"}},
                            {"valueEnum": {"enumIndex": 60001, "enumConst": "COMPONENT"}}
                        ]
                    },
                    "Identification": {
                        "type": "string",
                        "minLength": 1,
                        "maxLength": 255,
                        "jausType": "unsigned byte"
                    }
                }
            }
        }
    })
}

/// A full bridge frame carrying a valid ReportIdentification
pub(crate) fn report_identification_frame() -> Value {
    json!({
        "messageId": "4b00",
        "messageName": "ReportIdentification",
        "jausIdSrc": "127.100.1",
        "jausIdDst": "127.255.255",
        "data": {
            "HeaderRec": {"MessageID": "4b00"},
            "ReportIdentificationRec": {
                "QueryType": "System Identification",
                "Type": "VEHICLE",
                "Identification": "TestVehicle"
            }
        }
    })
}
