//! Document command grammar.
//!
//! Accepts the shell subset
//! `db.<collection>.<method>(<args>)[.sort(..)][.skip(..)][.limit(..)]`
//! plus `show collections`. Arguments go through the structured-literal
//! parser; nothing is evaluated.

use mongodb::bson::{Bson, Document};

use common::errors::{AppError, AppResult};
use common::utils::is_collection_name;

use super::literal::{self, Cursor};
use super::ROW_CAP;

/// Validated document command.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    Find {
        collection: String,
        filter: Document,
        projection: Option<Document>,
        sort: Option<Document>,
        skip: Option<u64>,
        /// Always within `1..=ROW_CAP`.
        limit: u64,
    },
    CountDocuments {
        collection: String,
        filter: Document,
    },
    InsertOne {
        collection: String,
        document: Document,
    },
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    UpdateOne {
        collection: String,
        filter: Document,
        update: Document,
    },
    UpdateMany {
        collection: String,
        filter: Document,
        update: Document,
    },
    DeleteOne {
        collection: String,
        filter: Document,
    },
    DeleteMany {
        collection: String,
        filter: Document,
    },
    ShowCollections,
}

impl DocumentCommand {
    /// Shell method name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            DocumentCommand::Find { .. } => "find",
            DocumentCommand::CountDocuments { .. } => "countDocuments",
            DocumentCommand::InsertOne { .. } => "insertOne",
            DocumentCommand::InsertMany { .. } => "insertMany",
            DocumentCommand::UpdateOne { .. } => "updateOne",
            DocumentCommand::UpdateMany { .. } => "updateMany",
            DocumentCommand::DeleteOne { .. } => "deleteOne",
            DocumentCommand::DeleteMany { .. } => "deleteMany",
            DocumentCommand::ShowCollections => "showCollections",
        }
    }

    pub fn collection(&self) -> Option<&str> {
        match self {
            DocumentCommand::Find { collection, .. }
            | DocumentCommand::CountDocuments { collection, .. }
            | DocumentCommand::InsertOne { collection, .. }
            | DocumentCommand::InsertMany { collection, .. }
            | DocumentCommand::UpdateOne { collection, .. }
            | DocumentCommand::UpdateMany { collection, .. }
            | DocumentCommand::DeleteOne { collection, .. }
            | DocumentCommand::DeleteMany { collection, .. } => Some(collection),
            DocumentCommand::ShowCollections => None,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            DocumentCommand::Find { .. }
                | DocumentCommand::CountDocuments { .. }
                | DocumentCommand::ShowCollections
        )
    }
}

impl std::fmt::Display for DocumentCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use literal::render_document as doc;

        let Some(collection) = self.collection() else {
            return write!(f, "show collections");
        };
        write!(f, "db.{}.{}(", collection_ref(collection), self.name())?;
        match self {
            DocumentCommand::Find {
                filter,
                projection,
                sort,
                skip,
                limit,
                ..
            } => {
                write!(f, "{}", doc(filter))?;
                if let Some(projection) = projection {
                    write!(f, ", {}", doc(projection))?;
                }
                write!(f, ")")?;
                if let Some(sort) = sort {
                    write!(f, ".sort({})", doc(sort))?;
                }
                if let Some(skip) = skip {
                    write!(f, ".skip({})", skip)?;
                }
                write!(f, ".limit({})", limit)
            }
            DocumentCommand::CountDocuments { filter, .. }
            | DocumentCommand::DeleteOne { filter, .. }
            | DocumentCommand::DeleteMany { filter, .. } => write!(f, "{})", doc(filter)),
            DocumentCommand::InsertOne { document, .. } => write!(f, "{})", doc(document)),
            DocumentCommand::InsertMany { documents, .. } => {
                let items: Vec<String> = documents.iter().map(doc).collect();
                write!(f, "[{}])", items.join(", "))
            }
            DocumentCommand::UpdateOne { filter, update, .. }
            | DocumentCommand::UpdateMany { filter, update, .. } => {
                write!(f, "{}, {})", doc(filter), doc(update))
            }
            DocumentCommand::ShowCollections => Ok(()),
        }
    }
}

const METHODS: [&str; 8] = [
    "find",
    "countDocuments",
    "insertOne",
    "insertMany",
    "updateOne",
    "updateMany",
    "deleteOne",
    "deleteMany",
];

const CURSOR_METHODS: [&str; 3] = ["sort", "skip", "limit"];

fn unsupported(msg: impl Into<String>) -> AppError {
    AppError::UnsupportedOperation(msg.into())
}

/// Parses one document command.
pub fn parse(text: &str) -> AppResult<DocumentCommand> {
    let body = text.trim();
    let body = body.strip_suffix(';').unwrap_or(body).trim_end();
    if body.is_empty() {
        return Err(unsupported("empty query"));
    }

    let words: Vec<&str> = body.split_whitespace().collect();
    if words.len() == 2
        && words[0].eq_ignore_ascii_case("show")
        && words[1].eq_ignore_ascii_case("collections")
    {
        return Ok(DocumentCommand::ShowCollections);
    }

    let mut cursor = Cursor::new(body);
    if cursor.ident() != Some("db") || !cursor.eat('.') {
        return Err(unsupported(
            "document queries must start with db.<collection>",
        ));
    }
    let collection = parse_collection(&mut cursor)?;
    if !cursor.eat('.') {
        return Err(unsupported("expected .<method>(...) after the collection"));
    }
    let method = cursor
        .ident()
        .ok_or_else(|| unsupported("expected a method name"))?;
    if !METHODS.contains(&method) {
        return Err(unsupported(format!(
            "`{}` is not a supported document operation",
            method
        )));
    }
    let args = parse_args(&mut cursor, method)?;

    let mut chain = Chain::default();
    while cursor.eat('.') {
        let name = cursor
            .ident()
            .ok_or_else(|| unsupported("expected a cursor method"))?;
        if method != "find" || !CURSOR_METHODS.contains(&name) {
            return Err(unsupported(format!(
                "`.{}()` cannot follow {}()",
                name, method
            )));
        }
        let chain_args = parse_args(&mut cursor, name)?;
        chain.apply(name, chain_args)?;
    }
    if !cursor.is_eof() {
        return Err(unsupported("unexpected text after the command"));
    }

    build(collection, method, args, chain)
}

/// `name` or `getCollection("name")`.
fn parse_collection(cursor: &mut Cursor<'_>) -> AppResult<String> {
    cursor.skip_ws();
    let name = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if name == "getCollection" && cursor.peek() == Some('(') {
        let args = parse_args(cursor, name)?;
        return match args.as_slice() {
            [Bson::String(name)] if is_collection_name(name) => Ok(name.clone()),
            _ => Err(unsupported("getCollection expects a valid collection name")),
        };
    }
    if name.is_empty() {
        return Err(unsupported("missing collection name"));
    }
    Ok(name.to_string())
}

fn is_bare_collection(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Shell reference to a collection: the bare name when it can follow `db.`
/// directly, `getCollection("...")` otherwise.
pub fn collection_ref(name: &str) -> String {
    if is_bare_collection(name) {
        name.to_string()
    } else {
        format!("getCollection(\"{}\")", name)
    }
}

/// Parses `( value, value, ... )`.
fn parse_args(cursor: &mut Cursor<'_>, method: &str) -> AppResult<Vec<Bson>> {
    if !cursor.eat('(') {
        return Err(unsupported(format!("expected `(` after `{}`", method)));
    }
    let mut args = Vec::new();
    if cursor.eat(')') {
        return Ok(args);
    }
    loop {
        args.push(literal::parse_value(cursor)?);
        if cursor.eat(')') {
            return Ok(args);
        }
        if !cursor.eat(',') {
            return Err(cursor.malformed(format!("unterminated arguments to `{}`", method)));
        }
    }
}

#[derive(Default)]
struct Chain {
    sort: Option<Document>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl Chain {
    fn apply(&mut self, name: &str, args: Vec<Bson>) -> AppResult<()> {
        let mut args = args.into_iter();
        let arg = args.next();
        if args.next().is_some() {
            return Err(malformed(format!("`.{}()` takes one argument", name)));
        }
        let arg = arg.ok_or_else(|| malformed(format!("`.{}()` needs an argument", name)))?;
        let slot_taken = match name {
            "sort" => self.sort.replace(expect_document(arg, "sort")?).is_some(),
            "skip" => self.skip.replace(expect_count(arg, "skip")?).is_some(),
            "limit" => self.limit.replace(expect_count(arg, "limit")?).is_some(),
            other => return Err(unsupported(format!("`.{}()` is not supported", other))),
        };
        if slot_taken {
            return Err(unsupported(format!("`.{}()` may appear only once", name)));
        }
        Ok(())
    }
}

fn malformed(msg: impl Into<String>) -> AppError {
    AppError::MalformedArguments(msg.into())
}

fn expect_document(value: Bson, what: &str) -> AppResult<Document> {
    match value {
        Bson::Document(doc) => Ok(doc),
        _ => Err(malformed(format!("{} must be an object", what))),
    }
}

fn expect_count(value: Bson, what: &str) -> AppResult<u64> {
    let n = match value {
        Bson::Int32(n) => i64::from(n),
        Bson::Int64(n) => n,
        Bson::Double(f) if f.fract() == 0.0 && f.abs() < 1e15 => f as i64,
        _ => return Err(malformed(format!("{} must be an integer", what))),
    };
    u64::try_from(n).map_err(|_| malformed(format!("{} must not be negative", what)))
}

/// Operators that make the server run JavaScript.
const SCRIPT_OPERATORS: [&str; 3] = ["$where", "$function", "$accumulator"];

/// Rejects script operators at any depth of `doc`.
fn reject_scripts(doc: &Document) -> AppResult<()> {
    for (key, value) in doc {
        if SCRIPT_OPERATORS.contains(&key.as_str()) {
            return Err(malformed(format!("`{}` is not allowed", key)));
        }
        reject_scripts_in(value)?;
    }
    Ok(())
}

fn reject_scripts_in(value: &Bson) -> AppResult<()> {
    match value {
        Bson::Document(doc) => reject_scripts(doc),
        Bson::Array(items) => items.iter().try_for_each(reject_scripts_in),
        _ => Ok(()),
    }
}

/// Fetches query document `i`, or an empty document when absent.
fn query_arg(args: &[Bson], i: usize, what: &str) -> AppResult<Document> {
    let doc = match args.get(i) {
        None => Document::new(),
        Some(value) => expect_document(value.clone(), what)?,
    };
    reject_scripts(&doc)?;
    Ok(doc)
}

fn arity(method: &str, args: &[Bson], max: usize) -> AppResult<()> {
    if args.len() > max {
        return Err(malformed(format!(
            "{}() accepts at most {} argument(s)",
            method, max
        )));
    }
    Ok(())
}

fn guarded_filter(method: &str, args: &[Bson]) -> AppResult<Document> {
    let filter = query_arg(args, 0, "filter")?;
    if filter.is_empty() {
        return Err(AppError::UnsafeMutation(format!(
            "{}() requires a non-empty filter",
            method
        )));
    }
    Ok(filter)
}

fn update_doc(method: &str, args: &[Bson]) -> AppResult<Document> {
    let update = match args.get(1) {
        Some(value) => expect_document(value.clone(), "update")?,
        None => {
            return Err(AppError::UnsafeMutation(format!(
                "{}() requires a filter and an update document",
                method
            )))
        }
    };
    if update.is_empty() {
        return Err(malformed("update document is empty"));
    }
    if let Some(key) = update.keys().find(|k| !k.starts_with('$')) {
        return Err(malformed(format!(
            "update keys must be operators such as $set, found `{}`",
            key
        )));
    }
    Ok(update)
}

fn build(
    collection: String,
    method: &str,
    args: Vec<Bson>,
    chain: Chain,
) -> AppResult<DocumentCommand> {
    let command = match method {
        "find" => {
            arity(method, &args, 2)?;
            let projection = match args.get(1) {
                Some(_) => Some(query_arg(&args, 1, "projection")?),
                None => None,
            };
            let limit = match chain.limit {
                Some(n) if n > 0 => n.min(ROW_CAP),
                _ => ROW_CAP,
            };
            DocumentCommand::Find {
                collection,
                filter: query_arg(&args, 0, "filter")?,
                projection,
                sort: chain.sort,
                skip: chain.skip.filter(|n| *n > 0),
                limit,
            }
        }
        "countDocuments" => {
            arity(method, &args, 1)?;
            DocumentCommand::CountDocuments {
                collection,
                filter: query_arg(&args, 0, "filter")?,
            }
        }
        "insertOne" => {
            arity(method, &args, 1)?;
            match args.into_iter().next() {
                Some(value) => DocumentCommand::InsertOne {
                    collection,
                    document: expect_document(value, "document")?,
                },
                None => return Err(malformed("insertOne() needs a document")),
            }
        }
        "insertMany" => {
            arity(method, &args, 1)?;
            let documents = match args.into_iter().next() {
                Some(Bson::Array(items)) if !items.is_empty() => items
                    .into_iter()
                    .map(|item| expect_document(item, "each inserted document"))
                    .collect::<AppResult<Vec<_>>>()?,
                _ => return Err(malformed("insertMany() needs a non-empty array of documents")),
            };
            DocumentCommand::InsertMany {
                collection,
                documents,
            }
        }
        "updateOne" | "updateMany" => {
            arity(method, &args, 2)?;
            let filter = guarded_filter(method, &args)?;
            let update = update_doc(method, &args)?;
            if method == "updateOne" {
                DocumentCommand::UpdateOne {
                    collection,
                    filter,
                    update,
                }
            } else {
                DocumentCommand::UpdateMany {
                    collection,
                    filter,
                    update,
                }
            }
        }
        "deleteOne" | "deleteMany" => {
            arity(method, &args, 1)?;
            let filter = guarded_filter(method, &args)?;
            if method == "deleteOne" {
                DocumentCommand::DeleteOne { collection, filter }
            } else {
                DocumentCommand::DeleteMany { collection, filter }
            }
        }
        other => {
            return Err(unsupported(format!(
                "`{}` is not a supported document operation",
                other
            )))
        }
    };
    Ok(command)
}
