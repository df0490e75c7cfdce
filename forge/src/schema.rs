//! Schema inventory for the `.proto` contracts.
//!
//! The schema tree is compiled into a `FileDescriptorSet` with protox and the
//! inventory is read off the descriptors. On top of what the compiler already
//! enforces, every message is re-checked for wire compatibility: reused field
//! numbers, numbers in the reserved implementation range, reserved names.

use crate::error::{ForgeError, Result};
use log::{debug, info};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, ServiceDescriptorProto,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MAX_FIELD_NUMBER: u32 = 536_870_911;
const IMPLEMENTATION_RESERVED: std::ops::RangeInclusive<u32> = 19_000..=19_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLabel {
    Singular,
    Optional,
    Required,
    Repeated,
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    pub type_name: String,
    pub number: u32,
    pub label: FieldLabel,
    /// Name of the enclosing `oneof`, if any.
    pub oneof: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageType {
    /// Nested messages are flattened as `Outer.Inner`.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcMethod {
    pub name: String,
    pub input: String,
    pub output: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceContract {
    pub name: String,
    pub methods: Vec<RpcMethod>,
}

/// One compiled `.proto` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDefinition {
    /// Path relative to the schema root.
    pub path: PathBuf,
    pub syntax: String,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub messages: Vec<MessageType>,
    pub enums: Vec<String>,
    pub services: Vec<ServiceContract>,
}

impl SchemaDefinition {
    /// Protobuf package, or the file stem for package-less schemas.
    pub fn name(&self) -> String {
        match &self.package {
            Some(package) => package.clone(),
            None => self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    /// API version taken from the last package segment (`cqc.markets.v1` -> `v1`).
    pub fn version(&self) -> Option<&str> {
        let last = self.package.as_deref()?.rsplit('.').next()?;
        let mut chars = last.chars();
        let is_version = chars.next() == Some('v')
            && chars.next().is_some_and(|c| c.is_ascii_digit())
            && last.chars().all(|c| c.is_ascii_alphanumeric());
        is_version.then_some(last)
    }

    pub fn has_services(&self) -> bool {
        !self.services.is_empty()
    }

    pub fn message(&self, name: &str) -> Option<&MessageType> {
        self.messages.iter().find(|m| m.name == name)
    }
}

/// Compiles and validates every `*.proto` file below `root`, sorted by path.
pub fn load_schemas(root: &Path) -> Result<Vec<SchemaDefinition>> {
    if !root.is_dir() {
        return Err(ForgeError::discovery(root, "schema directory does not exist"));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "proto") {
            continue;
        }
        files.push(path.strip_prefix(root).unwrap_or(path).to_path_buf());
    }
    if files.is_empty() {
        return Err(ForgeError::discovery(root, "no .proto schema files found"));
    }

    debug!("Compiling {} schema file(s) under {}", files.len(), root.display());
    let descriptors = protox::compile(files.iter().map(|f| root.join(f)), [root]).map_err(|e| {
        ForgeError::SchemaParse {
            path: root.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    let schemas = schemas_from_descriptors(&descriptors, &files)?;
    info!("Loaded {} schema file(s) from {}", schemas.len(), root.display());
    Ok(schemas)
}

/// Builds the inventory for `files` (relative to the schema root) out of a
/// compiled descriptor set. Imported files not listed in `files` are skipped.
pub fn schemas_from_descriptors(
    descriptors: &FileDescriptorSet,
    files: &[PathBuf],
) -> Result<Vec<SchemaDefinition>> {
    let by_name: BTreeMap<&str, &FileDescriptorProto> =
        descriptors.file.iter().map(|f| (f.name(), f)).collect();

    let mut schemas = Vec::with_capacity(files.len());
    for path in files {
        let name = descriptor_name(path);
        let file = by_name.get(name.as_str()).ok_or_else(|| {
            invalid_schema(path, "missing from the compiled descriptor set".to_string())
        })?;
        schemas.push(schema_from_descriptor(path, file)?);
    }
    check_unique_types(&schemas)?;
    Ok(schemas)
}

/// Descriptor names always use `/`, whatever the host separator is.
fn descriptor_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Converts and validates one file descriptor.
pub fn schema_from_descriptor(path: &Path, file: &FileDescriptorProto) -> Result<SchemaDefinition> {
    let package = file.package.clone().filter(|p| !p.is_empty());
    let syntax = match file.syntax() {
        "" => "proto2".to_string(),
        other => other.to_string(),
    };
    let proto3 = syntax == "proto3";

    let mut messages = Vec::new();
    let mut enums: Vec<String> = file.enum_type.iter().map(|e| e.name().to_string()).collect();
    for message in &file.message_type {
        collect_message(path, "", message, proto3, package.as_deref(), &mut messages, &mut enums)?;
    }

    let services = file
        .service
        .iter()
        .map(|s| service_contract(s, package.as_deref()))
        .collect();

    Ok(SchemaDefinition {
        path: path.to_path_buf(),
        syntax,
        package,
        imports: file.dependency.clone(),
        messages,
        enums,
        services,
    })
}

/// Flattens `message` and its nested types into `messages`, validating each.
fn collect_message(
    path: &Path,
    prefix: &str,
    message: &DescriptorProto,
    proto3: bool,
    package: Option<&str>,
    messages: &mut Vec<MessageType>,
    enums: &mut Vec<String>,
) -> Result<()> {
    let name = format!("{}{}", prefix, message.name());
    validate_message(path, &name, message)?;

    let map_entries: BTreeMap<&str, &DescriptorProto> = message
        .nested_type
        .iter()
        .filter(|n| is_map_entry(n))
        .map(|n| (n.name(), n))
        .collect();

    let fields = message
        .field
        .iter()
        .map(|field| field_definition(message, field, proto3, package, &map_entries))
        .collect();
    messages.push(MessageType {
        name: name.clone(),
        fields,
    });

    let nested_prefix = format!("{}.", name);
    enums.extend(
        message
            .enum_type
            .iter()
            .map(|e: &EnumDescriptorProto| format!("{}{}", nested_prefix, e.name())),
    );
    for nested in message.nested_type.iter().filter(|n| !is_map_entry(n)) {
        collect_message(path, &nested_prefix, nested, proto3, package, messages, enums)?;
    }
    Ok(())
}

fn is_map_entry(message: &DescriptorProto) -> bool {
    message
        .options
        .as_ref()
        .is_some_and(|options| options.map_entry())
}

fn field_definition(
    message: &DescriptorProto,
    field: &FieldDescriptorProto,
    proto3: bool,
    package: Option<&str>,
    map_entries: &BTreeMap<&str, &DescriptorProto>,
) -> FieldDefinition {
    let map_entry = match field.r#type() {
        Type::Message => field
            .type_name()
            .rsplit('.')
            .next()
            .and_then(|entry| map_entries.get(entry)),
        _ => None,
    };

    let (label, type_name) = match map_entry {
        Some(entry) => {
            let key = entry.field.iter().find(|f| f.number() == 1);
            let value = entry.field.iter().find(|f| f.number() == 2);
            let render = |f: Option<&FieldDescriptorProto>| {
                f.map(|f| type_name(f, package)).unwrap_or_default()
            };
            (
                FieldLabel::Map,
                format!("map<{}, {}>", render(key), render(value)),
            )
        }
        None => {
            let label = match field.label() {
                Label::Repeated => FieldLabel::Repeated,
                Label::Required => FieldLabel::Required,
                Label::Optional if !proto3 || field.proto3_optional() => FieldLabel::Optional,
                Label::Optional => FieldLabel::Singular,
            };
            (label, type_name(field, package))
        }
    };

    // proto3 `optional` fields live in a synthetic oneof that is not part of the contract.
    let oneof = field
        .oneof_index
        .filter(|_| !field.proto3_optional())
        .and_then(|index| usize::try_from(index).ok())
        .and_then(|index| message.oneof_decl.get(index))
        .map(|decl| decl.name().to_string());

    FieldDefinition {
        name: field.name().to_string(),
        type_name,
        number: u32::try_from(field.number()).unwrap_or(0),
        label,
        oneof,
    }
}

fn type_name(field: &FieldDescriptorProto, package: Option<&str>) -> String {
    let scalar = match field.r#type() {
        Type::Double => "double",
        Type::Float => "float",
        Type::Int64 => "int64",
        Type::Uint64 => "uint64",
        Type::Int32 => "int32",
        Type::Fixed64 => "fixed64",
        Type::Fixed32 => "fixed32",
        Type::Bool => "bool",
        Type::String => "string",
        Type::Bytes => "bytes",
        Type::Uint32 => "uint32",
        Type::Sfixed32 => "sfixed32",
        Type::Sfixed64 => "sfixed64",
        Type::Sint32 => "sint32",
        Type::Sint64 => "sint64",
        Type::Group | Type::Message | Type::Enum => {
            return local_name(field.type_name(), package)
        }
    };
    scalar.to_string()
}

/// `.cqc.orders.v1.Order.Fill` -> `Order.Fill` inside `cqc.orders.v1`,
/// fully qualified (without the leading dot) otherwise.
fn local_name(type_name: &str, package: Option<&str>) -> String {
    let full = type_name.trim_start_matches('.');
    package
        .and_then(|p| full.strip_prefix(p))
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(full)
        .to_string()
}

fn service_contract(service: &ServiceDescriptorProto, package: Option<&str>) -> ServiceContract {
    ServiceContract {
        name: service.name().to_string(),
        methods: service
            .method
            .iter()
            .map(|m| RpcMethod {
                name: m.name().to_string(),
                input: local_name(m.input_type(), package),
                output: local_name(m.output_type(), package),
                client_streaming: m.client_streaming(),
                server_streaming: m.server_streaming(),
            })
            .collect(),
    }
}

/// Two files of the same package must not define the same message.
fn check_unique_types(schemas: &[SchemaDefinition]) -> Result<()> {
    let mut seen: BTreeMap<String, &Path> = BTreeMap::new();
    for schema in schemas {
        let package = schema.package.clone().unwrap_or_default();
        for message in &schema.messages {
            let full = format!("{}.{}", package, message.name);
            if let Some(first) = seen.insert(full.clone(), &schema.path) {
                return Err(ForgeError::InvalidSchema {
                    path: schema.path.clone(),
                    message: format!("message {} already defined in {}", full, first.display()),
                });
            }
        }
    }
    Ok(())
}

fn invalid_schema(path: &Path, message: String) -> ForgeError {
    ForgeError::InvalidSchema {
        path: path.to_path_buf(),
        message,
    }
}

fn validate_message(path: &Path, name: &str, message: &DescriptorProto) -> Result<()> {
    let reserved_names: BTreeSet<&str> = message.reserved_name.iter().map(String::as_str).collect();
    let mut numbers = BTreeMap::new();
    let mut names = BTreeSet::new();

    for field in &message.field {
        let field_name = field.name();
        let number = match u32::try_from(field.number()) {
            Ok(n) if (1..=MAX_FIELD_NUMBER).contains(&n) => n,
            _ => {
                return Err(invalid_schema(
                    path,
                    format!("{}.{} has out-of-range number {}", name, field_name, field.number()),
                ))
            }
        };
        if IMPLEMENTATION_RESERVED.contains(&number) {
            return Err(invalid_schema(
                path,
                format!(
                    "{}.{} uses number {} from the implementation-reserved range",
                    name, field_name, number
                ),
            ));
        }
        // Reserved ranges are end-exclusive in descriptors.
        if message
            .reserved_range
            .iter()
            .any(|r| (r.start()..r.end()).contains(&field.number()))
        {
            return Err(invalid_schema(
                path,
                format!("{}.{} uses reserved number {}", name, field_name, number),
            ));
        }
        if reserved_names.contains(field_name) {
            return Err(invalid_schema(
                path,
                format!("{}.{} uses a reserved name", name, field_name),
            ));
        }
        if let Some(previous) = numbers.insert(number, field_name) {
            return Err(invalid_schema(
                path,
                format!(
                    "{} reuses field number {} for {} and {}",
                    name, number, previous, field_name
                ),
            ));
        }
        if !names.insert(field_name) {
            return Err(invalid_schema(
                path,
                format!("{} declares field {} twice", name, field_name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::descriptor_proto::ReservedRange;
    use std::fs;

    const ORDERS: &str = r#"
        syntax = "proto3";

        package cqc.orders.v1;

        import "google/protobuf/timestamp.proto";
        option go_package = "github.com/Combine-Capital/cqc/gen/go/cqc/orders/v1;ordersv1";

        /* Side of an order. */
        enum Side {
          SIDE_UNSPECIFIED = 0;
          SIDE_BUY = 1;
          SIDE_SELL = 2;
        }

        message Order {
          string order_id = 1; // venue assigned
          Side side = 2;
          double quantity = 3 [json_name = "qty"];
          repeated string tags = 4;
          map<string, string> attributes = 5;
          optional double limit_price = 6;
          google.protobuf.Timestamp created_at = 7;
          oneof venue {
            string exchange = 8;
            string dark_pool = 9;
          }
          reserved 10 to 12, 15;
          reserved "legacy_id";

          message Fill {
            double price = 1;
            double quantity = 2;
          }
          repeated Fill fills = 13;
        }

        service OrderService {
          rpc SubmitOrder(Order) returns (Order);
          rpc StreamFills(Order) returns (stream Order.Fill) {
            option deprecated = false;
          }
        }
    "#;

    fn load_one(relative: &str, source: &str) -> Result<SchemaDefinition> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, source).unwrap();
        let mut schemas = load_schemas(dir.path())?;
        Ok(schemas.remove(0))
    }

    fn field(name: &str, number: i32) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(Type::Int32 as i32),
            ..Default::default()
        }
    }

    fn message(fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
        DescriptorProto {
            name: Some("A".to_string()),
            field: fields,
            ..Default::default()
        }
    }

    fn check(message: &DescriptorProto) -> Result<()> {
        validate_message(Path::new("a.proto"), "A", message)
    }

    #[test]
    fn test_load_full_schema() {
        let schema = load_one("cqc/orders/v1/orders.proto", ORDERS).unwrap();
        assert_eq!(schema.path, PathBuf::from("cqc/orders/v1/orders.proto"));
        assert_eq!(schema.syntax, "proto3");
        assert_eq!(schema.package.as_deref(), Some("cqc.orders.v1"));
        assert_eq!(schema.name(), "cqc.orders.v1");
        assert_eq!(schema.version(), Some("v1"));
        assert_eq!(schema.imports, vec!["google/protobuf/timestamp.proto"]);
        assert_eq!(schema.enums, vec!["Side"]);

        let names: Vec<&str> = schema.messages.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Order", "Order.Fill"]);

        let order = schema.message("Order").unwrap();
        let numbers: Vec<u32> = order.fields.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 13]);
        assert_eq!(order.fields[0].label, FieldLabel::Singular);
        assert_eq!(order.fields[1].type_name, "Side");
        assert_eq!(order.fields[3].label, FieldLabel::Repeated);
        assert_eq!(order.fields[4].label, FieldLabel::Map);
        assert_eq!(order.fields[4].type_name, "map<string, string>");
        assert_eq!(order.fields[5].label, FieldLabel::Optional);
        assert_eq!(order.fields[5].oneof, None);
        assert_eq!(order.fields[6].type_name, "google.protobuf.Timestamp");
        assert_eq!(order.fields[8].oneof.as_deref(), Some("venue"));
        assert_eq!(order.fields[9].type_name, "Order.Fill");

        assert!(schema.has_services());
        let service = &schema.services[0];
        assert_eq!(service.name, "OrderService");
        assert_eq!(service.methods.len(), 2);
        assert_eq!(service.methods[0].input, "Order");
        assert!(!service.methods[0].server_streaming);
        assert!(service.methods[1].server_streaming);
        assert_eq!(service.methods[1].output, "Order.Fill");
    }

    #[test]
    fn test_proto2_groups_are_accepted() {
        let schema = load_one(
            "search.proto",
            "syntax = \"proto2\";\nmessage A {\n  repeated group Result = 1 {\n    optional string url = 2;\n  }\n}\n",
        )
        .unwrap();
        assert_eq!(schema.syntax, "proto2");
        assert_eq!(schema.name(), "search");
        let names: Vec<&str> = schema.messages.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["A", "A.Result"]);

        let group = &schema.message("A").unwrap().fields[0];
        assert_eq!(group.label, FieldLabel::Repeated);
        assert_eq!(group.type_name, "A.Result");
        assert_eq!(schema.message("A.Result").unwrap().fields[0].label, FieldLabel::Optional);
    }

    #[test]
    fn test_octal_field_numbers_collide() {
        // 010 is octal 8.
        let result = load_one(
            "b.proto",
            "syntax = \"proto3\";\nmessage B { int32 a = 010; int32 b = 8; }\n",
        );
        assert!(result.is_err());

        let schema = load_one(
            "c.proto",
            "syntax = \"proto3\";\nmessage C { int32 a = 010; int32 b = 0x9; }\n",
        )
        .unwrap();
        let numbers: Vec<u32> = schema.messages[0].fields.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![8, 9]);
    }

    #[test]
    fn test_syntax_errors_are_schema_parse() {
        let err = load_one("a.proto", "syntax = \"proto3\";\nmessage A {\n  int32 a = ;\n}").unwrap_err();
        assert!(matches!(err, ForgeError::SchemaParse { .. }));
        assert!(load_one("a.proto", "message A { int32 a = 1;").is_err());
    }

    #[test]
    fn test_duplicate_field_number_rejected() {
        let err = check(&message(vec![field("a", 1), field("b", 1)])).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidSchema { .. }));

        let err = check(&message(vec![field("a", 1), field("a", 2)])).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidSchema { .. }));
    }

    #[test]
    fn test_reserved_numbers_rejected() {
        let mut reserved = message(vec![field("a", 4)]);
        reserved.reserved_range = vec![ReservedRange {
            start: Some(2),
            end: Some(5),
        }];
        assert!(matches!(check(&reserved), Err(ForgeError::InvalidSchema { .. })));

        // `end` is exclusive.
        reserved.field = vec![field("a", 5)];
        assert!(check(&reserved).is_ok());

        let mut named = message(vec![field("legacy_id", 1)]);
        named.reserved_name = vec!["legacy_id".to_string()];
        assert!(matches!(check(&named), Err(ForgeError::InvalidSchema { .. })));

        for number in [0, 19_500, 536_870_912] {
            let err = check(&message(vec![field("a", number)])).unwrap_err();
            assert!(matches!(err, ForgeError::InvalidSchema { .. }));
        }
    }

    #[test]
    fn test_imports_outside_the_listing_are_skipped() {
        let set = FileDescriptorSet {
            file: vec![
                FileDescriptorProto {
                    name: Some("google/protobuf/timestamp.proto".to_string()),
                    package: Some("google.protobuf".to_string()),
                    ..Default::default()
                },
                FileDescriptorProto {
                    name: Some("cqc/v1/ticks.proto".to_string()),
                    package: Some("cqc.v1".to_string()),
                    syntax: Some("proto3".to_string()),
                    message_type: vec![message(vec![field("a", 1)])],
                    ..Default::default()
                },
            ],
        };
        let schemas =
            schemas_from_descriptors(&set, &[PathBuf::from("cqc/v1/ticks.proto")]).unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name(), "cqc.v1");
        assert_eq!(schemas[0].messages[0].fields[0].label, FieldLabel::Singular);

        let err = schemas_from_descriptors(&set, &[PathBuf::from("cqc/v1/other.proto")]).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidSchema { .. }));
    }

    #[test]
    fn test_load_schemas_sorted_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("cqc/v1")).unwrap();
        fs::write(root.join("cqc/v1/b.proto"), "syntax = \"proto3\"; package cqc.v1; message Quote { double p = 1; }").unwrap();
        fs::write(root.join("cqc/v1/a.proto"), "syntax = \"proto3\"; package cqc.v1; message Tick { double p = 1; }").unwrap();

        let schemas = load_schemas(root).unwrap();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].path, PathBuf::from("cqc/v1/a.proto"));

        fs::write(root.join("cqc/v1/c.proto"), "syntax = \"proto3\"; package cqc.v1; message Tick { double q = 1; }").unwrap();
        assert!(load_schemas(root).is_err());
    }

    #[test]
    fn test_load_schemas_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_schemas(dir.path()).unwrap_err();
        assert!(matches!(err, ForgeError::DiscoveryError { .. }));
    }
}
