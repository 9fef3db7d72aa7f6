//! In-memory backends. Cheap to clone: clones share the same maps.

use super::{ByteStore, InsertOutcome, StatusStore};
use crate::error::PersistenceError;
use crate::model::{
    Document, DocumentId, DocumentUpdate, ExtractionResult, NewDocument, ObjectLocation, ResultId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Objects = HashMap<(String, String), Vec<u8>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryByteStore {
    objects: Arc<RwLock<Objects>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects in `bucket`.
    pub async fn object_count(&self, bucket: &str) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }
}

#[async_trait]
impl ByteStore for MemoryByteStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PersistenceError> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| PersistenceError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<ObjectLocation, PersistenceError> {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<DocumentId, Document>,
    results: HashMap<ResultId, ExtractionResult>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of result rows across all documents.
    pub async fn result_count(&self) -> usize {
        self.tables.read().await.results.len()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn create_document(&self, new: NewDocument) -> Result<Document, PersistenceError> {
        let mut tables = self.tables.write().await;
        if tables.documents.contains_key(&new.id) {
            return Err(PersistenceError::DocumentExists { id: new.id });
        }
        let doc = Document::pending(new);
        tables.documents.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, PersistenceError> {
        Ok(self.tables.read().await.documents.get(&id).cloned())
    }

    async fn update_document(
        &self,
        id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, PersistenceError> {
        let mut tables = self.tables.write().await;
        let doc = tables
            .documents
            .get_mut(&id)
            .ok_or(PersistenceError::DocumentNotFound(id))?;
        doc.apply(update)?;
        Ok(doc.clone())
    }

    async fn insert_result(
        &self,
        result: ExtractionResult,
    ) -> Result<InsertOutcome, PersistenceError> {
        let mut tables = self.tables.write().await;
        if tables.results.contains_key(&result.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        tables.results.insert(result.id, result);
        Ok(InsertOutcome::Inserted)
    }

    async fn get_result(&self, id: ResultId) -> Result<Option<ExtractionResult>, PersistenceError> {
        Ok(self.tables.read().await.results.get(&id).cloned())
    }

    async fn results_for(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ExtractionResult>, PersistenceError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ExtractionResult> = tables
            .results
            .values()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentStatus;
    use crate::schema::{Clauses, ContractExtraction, Dates, Parties};
    use chrono::Utc;

    fn new_doc() -> NewDocument {
        NewDocument {
            id: DocumentId::new(),
            filename: "nda.pdf".into(),
            file_size: 10,
            bucket: "uploads".into(),
            object_key: "k.pdf".into(),
        }
    }

    fn result(id: ResultId, document_id: DocumentId) -> ExtractionResult {
        ExtractionResult {
            id,
            document_id,
            model_used: "gpt-4o-mini".into(),
            structured_payload: ContractExtraction {
                parties: Parties::default(),
                dates: Dates::default(),
                clauses: Clauses::default(),
                confidence: 0.5,
                summary: None,
            },
            confidence: 0.5,
            artifact_location: ObjectLocation {
                bucket: "extractions".into(),
                key: format!("{document_id}.json"),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn byte_store_overwrites() {
        let store = MemoryByteStore::new();
        store.put("b", "k", b"one".to_vec()).await.unwrap();
        store.put("b", "k", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("b", "k").await.unwrap(), b"two");
        assert_eq!(store.object_count("b").await, 1);
        assert!(matches!(
            store.get("b", "missing").await,
            Err(PersistenceError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_result_insert_is_not_an_error() {
        let store = MemoryStatusStore::new();
        let doc = store.create_document(new_doc()).await.unwrap();
        let rid = ResultId::new();
        assert_eq!(
            store.insert_result(result(rid, doc.id)).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_result(result(rid, doc.id)).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.result_count().await, 1);
        assert_eq!(store.latest_result(doc.id).await.unwrap().unwrap().id, rid);
    }

    #[tokio::test]
    async fn update_enforces_transitions() {
        let store = MemoryStatusStore::new();
        let doc = store.create_document(new_doc()).await.unwrap();
        store
            .update_document(doc.id, DocumentUpdate::Failed { message: "bad".into() })
            .await
            .unwrap();
        let err = store
            .update_document(doc.id, DocumentUpdate::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidTransition { .. }));
        let doc = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = MemoryStatusStore::new();
        let new = new_doc();
        store.create_document(new.clone()).await.unwrap();
        assert!(matches!(
            store.create_document(new).await,
            Err(PersistenceError::DocumentExists { .. })
        ));
    }

    #[tokio::test]
    async fn missing_document_update_is_not_found() {
        let store = MemoryStatusStore::new();
        let err = store
            .update_document(DocumentId::new(), DocumentUpdate::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::DocumentNotFound(_)));
    }
}
