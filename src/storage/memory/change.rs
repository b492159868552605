// ============================================================================
// Transaction Change Log
// ============================================================================
//
// Writes issued inside a session transaction are applied to the session's
// private working copy and recorded here. On COMMIT the log is replayed, in
// order, onto the shared store; on ABORT it is simply dropped.
//
// ============================================================================

use bson::Document;
use bson::oid::ObjectId;

/// A single write recorded by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new document
    Insert {
        namespace: String,
        id: ObjectId,
        doc: Document,
    },

    /// Replace an existing document wholesale
    Replace {
        namespace: String,
        id: ObjectId,
        doc: Document,
    },

    /// Delete an existing document
    Delete { namespace: String, id: ObjectId },
}

impl Change {
    /// Namespace ("db.collection") affected by this change
    pub fn namespace(&self) -> &str {
        match self {
            Change::Insert { namespace, .. } => namespace,
            Change::Replace { namespace, .. } => namespace,
            Change::Delete { namespace, .. } => namespace,
        }
    }

    /// Identifier of the affected document
    pub fn id(&self) -> ObjectId {
        match self {
            Change::Insert { id, .. } | Change::Replace { id, .. } | Change::Delete { id, .. } => *id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Change::Insert { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_change_accessors() {
        let id = ObjectId::new();
        let change = Change::Insert {
            namespace: "models.doc".to_string(),
            id,
            doc: doc! { "_id": id, "name": "check" },
        };
        assert_eq!(change.namespace(), "models.doc");
        assert_eq!(change.id(), id);
        assert!(change.is_insert());

        let delete = Change::Delete {
            namespace: "models.doc".to_string(),
            id,
        };
        assert!(!delete.is_insert());
        assert_eq!(delete.id(), id);
    }
}
