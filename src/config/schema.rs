use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "run": {
                "type": "object",
                "properties": {
                    "target": { "type": "string" },
                    "intent": { "type": "string" }
                }
            },
            "engine": {
                "type": "object",
                "properties": {
                    "max_concurrent_containers": { "type": "integer", "minimum": 1 },
                    "max_fanout": { "type": "integer", "minimum": 1 },
                    "max_defer_ticks": { "type": "integer", "minimum": 1 },
                    "infrastructure_retries": { "type": "integer", "minimum": 0 },
                    "retry_base_delay_ms": { "type": "integer", "minimum": 0 },
                    "output_cap_bytes": { "type": "integer", "minimum": 1024 },
                    "termination_grace_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "phases": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "exit"],
                    "properties": {
                        "name": { "type": "string" },
                        "display_name": { "type": "string" },
                        "description": { "type": "string" },
                        "exit": { "$ref": "#/$defs/predicate" },
                        "budget": { "type": "integer", "minimum": 1 }
                    }
                }
            },
            "policy": {
                "type": "object",
                "properties": {
                    "version": { "type": "string" },
                    "scope": { "type": "array", "items": { "type": "string" } },
                    "denied_tools": { "type": "array", "items": { "type": "string" } },
                    "deny_classes": { "type": "array", "items": { "$ref": "#/$defs/class" } },
                    "destructive_patterns": { "type": "array", "items": { "type": "string" } },
                    "approval_classes": { "type": "array", "items": { "$ref": "#/$defs/class" } },
                    "approval_tools": { "type": "array", "items": { "type": "string" } },
                    "approval_expiry_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "tools": { "type": "array", "items": { "$ref": "#/$defs/tool" } },
            "tools_dir": { "type": "string" },
            "planner": {
                "type": "object",
                "properties": {
                    "plan_file": { "type": "string" },
                    "endpoint": { "type": "string" },
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "max_retries": { "type": "integer", "minimum": 0 },
                    "api_key_env": { "type": "string" }
                }
            },
            "output": {
                "type": "object",
                "properties": {
                    "directory": { "type": "string" }
                }
            }
        },
        "$defs": {
            "class": { "type": "string", "enum": ["passive", "active", "high-impact", "destructive"] },
            "predicate": {
                "type": "object",
                "required": ["kind"],
                "properties": {
                    "kind": {
                        "type": "string",
                        "enum": ["always", "never", "any-finding", "finding-of-type", "severity-at-least", "all-of", "any-of"]
                    },
                    "type": { "type": "string", "enum": ["subdomain", "open-port", "endpoint", "vulnerability", "technology"] },
                    "min_count": { "type": "integer", "minimum": 1 },
                    "severity": { "type": "string", "enum": ["critical", "high", "medium", "low", "info"] },
                    "predicates": { "type": "array", "items": { "$ref": "#/$defs/predicate" } }
                }
            },
            "tool": {
                "type": "object",
                "required": ["name", "image", "command"],
                "properties": {
                    "name": { "type": "string" },
                    "image": { "type": "string" },
                    "command": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                    "description": { "type": "string" },
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "limits": {
                        "type": "object",
                        "properties": {
                            "cpus": { "type": "number", "exclusiveMinimum": 0 },
                            "memory_mb": { "type": "integer", "minimum": 16 },
                            "pids": { "type": "integer", "minimum": 1 }
                        }
                    },
                    "network": { "type": "string", "enum": ["none", "egress"] },
                    "scratch_volume": { "type": "boolean" },
                    "class": { "$ref": "#/$defs/class" },
                    "parser": { "type": "string" },
                    "defaults": { "type": "object" }
                }
            }
        }
    })
});
