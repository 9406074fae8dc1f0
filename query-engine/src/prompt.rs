//! Prompt construction.

use common::models::{BackendKind, SchemaMap};

use crate::grammar::ROW_CAP;

/// Builds the model prompt for one request.
///
/// Pure and infallible: an empty schema or an empty table list still yields
/// a usable prompt, just without field grounding.
pub fn build(
    kind: BackendKind,
    natural_language: &str,
    tables: &[String],
    schema: &SchemaMap,
) -> String {
    let schema_block = schema_block(kind, schema);
    let first = tables
        .first()
        .map(String::as_str)
        .or_else(|| schema.keys().next().map(String::as_str))
        .unwrap_or(match kind {
            BackendKind::Relational => "table_name",
            BackendKind::Document => "collection",
        });

    match kind {
        BackendKind::Relational => relational(natural_language, tables, &schema_block, first),
        BackendKind::Document => document(natural_language, tables, &schema_block, first),
    }
}

/// Lists every table and column, or returns `None` for an empty schema.
fn schema_block(kind: BackendKind, schema: &SchemaMap) -> Option<String> {
    if schema.is_empty() {
        return None;
    }
    let label = match kind {
        BackendKind::Relational => "Table",
        BackendKind::Document => "Collection",
    };
    let mut out = String::new();
    for (table, columns) in schema {
        out.push_str(&format!("\n{}: {}\n", label, table));
        if columns.is_empty() {
            out.push_str("  - No columns found\n");
        }
        for column in columns {
            out.push_str(&format!("  - {} ({})", column.name, column.data_type));
            if column.is_primary_key {
                out.push_str(" [PRIMARY KEY]");
            }
            if !column.nullable {
                out.push_str(" [NOT NULL]");
            }
            out.push('\n');
        }
    }
    out.push_str("\nIMPORTANT: You MUST use these exact names in your query!\n");
    Some(out)
}

fn relational(request: &str, tables: &[String], schema: &Option<String>, first: &str) -> String {
    let (context, naming, examples) = match schema {
        Some(block) => (
            format!("AVAILABLE TABLE SCHEMAS:\n{}", block),
            "Use ONLY the exact column names listed in the schemas above",
            format!(
                "EXAMPLES with your schema:\n\
                 - SELECT: SELECT column1, column2 FROM {t} LIMIT {cap};\n\
                 - COUNT: SELECT COUNT(*) AS total FROM {t};\n\
                 - INSERT: INSERT INTO {t} (column1, column2) VALUES ('value1', 'value2');\n\
                 - UPDATE: UPDATE {t} SET column1 = 'new_value' WHERE id = 1;\n\
                 - DELETE: DELETE FROM {t} WHERE id = 1;",
                t = first,
                cap = ROW_CAP
            ),
        ),
        None => (
            format!("Available tables: {}", tables.join(", ")),
            "Use common column names like id, name, email, created_at",
            format!(
                "EXAMPLES:\n\
                 - SELECT * FROM {t} LIMIT {cap};\n\
                 - INSERT INTO {t} (name, email) VALUES ('John', 'john@email.com');\n\
                 - UPDATE {t} SET name = 'Jane' WHERE id = 1;\n\
                 - DELETE FROM {t} WHERE id = 1;",
                t = first,
                cap = ROW_CAP
            ),
        ),
    };

    format!(
        "You are an expert MySQL query generator. Convert the following natural language request into a precise MySQL query.\n\
         \n\
         {context}\n\
         \n\
         Natural language request: \"{request}\"\n\
         \n\
         CRITICAL REQUIREMENTS:\n\
         1. Generate ONLY the SQL query - no explanations, no markdown, no code fences, no extra text\n\
         2. {naming}\n\
         3. Generate exactly one statement: SELECT, INSERT, UPDATE or DELETE\n\
         4. For SELECT queries, include a LIMIT clause (maximum {cap} rows)\n\
         5. For UPDATE, always include a WHERE clause; never update all rows\n\
         6. For DELETE, always include a WHERE clause; never delete all rows\n\
         7. For INSERT, use explicit column names and matching data types\n\
         8. Do not use comments\n\
         9. End with a semicolon\n\
         \n\
         {examples}\n\
         \n\
         Generate the MySQL query now:",
        context = context,
        request = request,
        naming = naming,
        cap = ROW_CAP,
        examples = examples,
    )
}

fn document(request: &str, tables: &[String], schema: &Option<String>, first: &str) -> String {
    let (context, naming, examples) = match schema {
        Some(block) => (
            format!("AVAILABLE COLLECTION SCHEMAS:\n{}", block),
            "Use ONLY the exact field names listed in the schemas above",
            format!(
                "EXAMPLES with your schema:\n\
                 - FIND: db.{c}.find({{}}).limit({cap})\n\
                 - COUNT: db.{c}.countDocuments({{}})\n\
                 - INSERT: db.{c}.insertOne({{field1: \"value1\", field2: \"value2\"}})\n\
                 - UPDATE: db.{c}.updateOne({{_id: ObjectId(\"...\")}}, {{$set: {{field1: \"new_value\"}}}})\n\
                 - DELETE: db.{c}.deleteOne({{_id: ObjectId(\"...\")}})",
                c = first,
                cap = ROW_CAP
            ),
        ),
        None => (
            format!("Available collections: {}", tables.join(", ")),
            "Use common field names like _id, name, email, createdAt",
            format!(
                "EXAMPLES:\n\
                 - db.{c}.find({{}}).limit({cap})\n\
                 - db.{c}.insertOne({{name: \"John\", email: \"john@email.com\"}})\n\
                 - db.{c}.updateOne({{_id: ObjectId(\"...\")}}, {{$set: {{name: \"Jane\"}}}})\n\
                 - db.{c}.deleteOne({{_id: ObjectId(\"...\")}})",
                c = first,
                cap = ROW_CAP
            ),
        ),
    };

    format!(
        "You are an expert MongoDB query generator. Convert the following natural language request into a precise MongoDB shell query.\n\
         \n\
         {context}\n\
         \n\
         Natural language request: \"{request}\"\n\
         \n\
         CRITICAL REQUIREMENTS:\n\
         1. Generate ONLY the MongoDB query - no explanations, no markdown, no code fences, no extra text\n\
         2. {naming}\n\
         3. Use exactly one of: find, countDocuments, insertOne, insertMany, updateOne, updateMany, deleteOne, deleteMany\n\
         4. For find queries, include a .limit() clause (maximum {cap} documents); .sort() and .skip() are allowed\n\
         5. For update operations, pass a non-empty filter and an update document made of operators ($set, $inc, $push, ...)\n\
         6. For delete operations, always pass a non-empty filter; never delete all documents\n\
         7. Arguments must be literal values only: objects, arrays, strings, numbers, booleans, null, ObjectId(\"...\"), ISODate(\"...\") and /regex/\n\
         8. Use MongoDB query operators ($eq, $gt, $gte, $in, $regex, ...) for filtering\n\
         \n\
         {examples}\n\
         \n\
         Generate the MongoDB query now:",
        context = context,
        request = request,
        naming = naming,
        cap = ROW_CAP,
        examples = examples,
    )
}
