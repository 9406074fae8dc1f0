//! MongoDB connector backed by the official driver.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::{Client, Collection, Cursor, Database};

use common::errors::{AppError, AppResult};
use common::models::{BackendKind, Credentials, DEFAULT_DOCUMENT_DATABASE};

use super::{DocumentConnector, DocumentOutcome, DocumentSession};
use crate::grammar::DocumentCommand;

const APP_NAME: &str = "query-engine";

/// Opens one client per session and shuts it down on close.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    connect_timeout: Duration,
}

impl MongoConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl DocumentConnector for MongoConnector {
    async fn open(&self, credentials: &Credentials) -> AppResult<Box<dyn DocumentSession>> {
        let options = build_client_options(credentials, self.connect_timeout)?;
        let database = credentials
            .resolved_database(BackendKind::Document)
            .unwrap_or_else(|| DEFAULT_DOCUMENT_DATABASE.to_string());

        let client =
            Client::with_options(options).map_err(|e| AppError::Connection(e.to_string()))?;
        let db = client.database(&database);

        // The driver connects lazily; ping so bad hosts or credentials fail here.
        if let Err(e) = db.run_command(doc! {"ping": 1}).await {
            client.shutdown().await;
            return Err(AppError::Connection(e.to_string()));
        }

        tracing::debug!(host = %credentials.host, database = %database, "MongoDB client opened");
        Ok(Box::new(MongoSession { client, db }))
    }
}

struct MongoSession {
    client: Client,
    db: Database,
}

impl MongoSession {
    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn exec_err(e: mongodb::error::Error) -> AppError {
    AppError::Execution(e.to_string())
}

async fn drain(mut cursor: Cursor<Document>) -> AppResult<Vec<Document>> {
    let mut docs = Vec::new();
    while cursor.advance().await.map_err(exec_err)? {
        docs.push(cursor.deserialize_current().map_err(exec_err)?);
    }
    Ok(docs)
}

#[async_trait]
impl DocumentSession for MongoSession {
    async fn sample(&mut self, collection: &str, limit: i64) -> AppResult<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .limit(limit)
            .await
            .map_err(exec_err)?;
        drain(cursor).await
    }

    async fn run(&mut self, command: &DocumentCommand) -> AppResult<DocumentOutcome> {
        let outcome = match command {
            DocumentCommand::Find {
                collection,
                filter,
                projection,
                sort,
                skip,
                limit,
            } => {
                let limit = i64::try_from(*limit).unwrap_or(i64::MAX);
                let collection = self.collection(collection);
                let mut find = collection.find(filter.clone()).limit(limit);
                if let Some(projection) = projection {
                    find = find.projection(projection.clone());
                }
                if let Some(sort) = sort {
                    find = find.sort(sort.clone());
                }
                if let Some(skip) = skip {
                    find = find.skip(*skip);
                }
                DocumentOutcome::Documents(drain(find.await.map_err(exec_err)?).await?)
            }
            DocumentCommand::CountDocuments { collection, filter } => DocumentOutcome::Count(
                self.collection(collection)
                    .count_documents(filter.clone())
                    .await
                    .map_err(exec_err)?,
            ),
            DocumentCommand::InsertOne {
                collection,
                document,
            } => {
                let result = self
                    .collection(collection)
                    .insert_one(document.clone())
                    .await
                    .map_err(exec_err)?;
                DocumentOutcome::Inserted(vec![result.inserted_id])
            }
            DocumentCommand::InsertMany {
                collection,
                documents,
            } => {
                let result = self
                    .collection(collection)
                    .insert_many(documents.clone())
                    .await
                    .map_err(exec_err)?;
                let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
                ids.sort_by_key(|(index, _)| *index);
                DocumentOutcome::Inserted(ids.into_iter().map(|(_, id)| id).collect())
            }
            DocumentCommand::UpdateOne {
                collection,
                filter,
                update,
            } => {
                let result = self
                    .collection(collection)
                    .update_one(filter.clone(), update.clone())
                    .await
                    .map_err(exec_err)?;
                DocumentOutcome::Updated {
                    matched: result.matched_count,
                    modified: result.modified_count,
                }
            }
            DocumentCommand::UpdateMany {
                collection,
                filter,
                update,
            } => {
                let result = self
                    .collection(collection)
                    .update_many(filter.clone(), update.clone())
                    .await
                    .map_err(exec_err)?;
                DocumentOutcome::Updated {
                    matched: result.matched_count,
                    modified: result.modified_count,
                }
            }
            DocumentCommand::DeleteOne { collection, filter } => DocumentOutcome::Deleted(
                self.collection(collection)
                    .delete_one(filter.clone())
                    .await
                    .map_err(exec_err)?
                    .deleted_count,
            ),
            DocumentCommand::DeleteMany { collection, filter } => DocumentOutcome::Deleted(
                self.collection(collection)
                    .delete_many(filter.clone())
                    .await
                    .map_err(exec_err)?
                    .deleted_count,
            ),
            DocumentCommand::ShowCollections => {
                DocumentOutcome::Collections(self.list_collections().await?)
            }
        };
        Ok(outcome)
    }

    async fn list_collections(&mut self) -> AppResult<Vec<String>> {
        let mut names = self.db.list_collection_names().await.map_err(exec_err)?;
        names.sort();
        Ok(names)
    }

    async fn ping(&mut self) -> AppResult<()> {
        self.db
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| AppError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.client.shutdown().await;
        tracing::debug!("MongoDB client closed");
    }
}

// ============== Options Builders ==============

fn build_client_options(credentials: &Credentials, timeout: Duration) -> AppResult<ClientOptions> {
    let port = credentials.port_or_default(BackendKind::Document);
    let address = ServerAddress::parse(format!("{}:{}", credentials.host.trim(), port))
        .map_err(|e| AppError::Connection(format!("invalid host: {}", e)))?;

    let credential = credentials.login().map(|(username, password)| {
        Credential::builder()
            .username(username.to_string())
            .password(password.to_string())
            .source(credentials.resolved_auth_database())
            .build()
    });

    Ok(ClientOptions::builder()
        .hosts(vec![address])
        .app_name(APP_NAME.to_string())
        .connect_timeout(timeout)
        .server_selection_timeout(timeout)
        .credential(credential)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_options_with_login() {
        let mut creds = Credentials::new("mongo.local");
        creds.username = Some("reader".into());
        creds.password = Some("pw".into());
        let options = build_client_options(&creds, Duration::from_secs(3)).unwrap();
        assert_eq!(options.hosts, vec![ServerAddress::parse("mongo.local:27017").unwrap()]);
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(3)));
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("reader"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[test]
    fn test_client_options_without_login() {
        let mut creds = Credentials::new("mongo.local");
        creds.port = Some(27018);
        creds.username = Some("reader".into());
        let options = build_client_options(&creds, Duration::from_secs(3)).unwrap();
        assert!(options.credential.is_none());
        assert_eq!(options.hosts, vec![ServerAddress::parse("mongo.local:27018").unwrap()]);
    }
}
