use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoBotDocument, MongoQueueDocument, MongoResultDocument, MongoTournamentDocument,
        SERVER_TIME_PENDING, at_version, doc_id, status_name,
    },
};
use crate::dao::{
    models::{QueueEntryEntity, ResultEntity, TournamentEntity, TournamentStatus},
    shard::ShardId,
    storage::StorageResult,
    tournament_store::TournamentStore,
    transaction::{Changeset, DocKey, ReadGuard, Versioned, WriteOp},
};

const QUEUE_COLLECTION_NAME: &str = "tournament_queue";
const BOT_COLLECTION_NAME: &str = "tournament_bots";

fn tournament_collection_name(shard: ShardId) -> String {
    format!("tournaments_{shard}")
}

fn result_collection_name(shard: ShardId) -> String {
    format!("tournament_results_{shard}")
}

/// MongoDB backend; optimistic commits run inside multi-document transactions,
/// so the server must be a replica set.
#[derive(Clone)]
pub struct MongoTournamentStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoState {
    /// Build a client and ping until the server answers or `connect_attempts` pings failed.
    async fn open(config: &MongoConfig) -> MongoResult<Self> {
        let client = Client::with_options(config.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&config.database_name);

        let mut attempt = 1;
        loop {
            match database.run_command(doc! { "ping": 1 }).await {
                Ok(_) => return Ok(Self { client, database }),
                Err(source) if attempt >= config.connect_attempts => {
                    return Err(MongoDaoError::InitialPing {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    debug!(
                        attempt,
                        error = %err,
                        database = %config.database_name,
                        "MongoDB ping failed"
                    );
                    sleep(config.backoff_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let state = MongoState::open(&self.config).await?;
        *self.state.write().await = state;
        Ok(())
    }
}

impl MongoTournamentStore {
    /// Connect to MongoDB and bootstrap the queue index and every shard's indexes.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let state = MongoState::open(&config).await?;
        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(state),
                config,
            }),
        };
        store.ensure_indexes().await?;
        info!(
            database = %store.inner.config.database_name,
            shards = store.inner.config.shard_count,
            "MongoDB tournament store ready"
        );
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        create_index(
            &database,
            QUEUE_COLLECTION_NAME.to_owned(),
            doc! {"game_type": 1, "status": 1, "enqueued_at": 1},
            "queue_drain_idx",
            None,
        )
        .await?;
        // At most one `waiting` entry per user and game type.
        create_index(
            &database,
            QUEUE_COLLECTION_NAME.to_owned(),
            doc! {"user_id": 1, "game_type": 1},
            "queue_waiting_user_idx",
            Some(doc! {"status": "waiting"}),
        )
        .await?;

        for shard in 0..self.inner.config.shard_count {
            let shard = ShardId(shard);
            create_index(
                &database,
                tournament_collection_name(shard),
                doc! {"players": 1, "status": 1},
                "tournament_player_idx",
                None,
            )
            .await?;
            create_index(
                &database,
                result_collection_name(shard),
                doc! {"tournament_id": 1, "user_id": 1},
                "result_tournament_idx",
                None,
            )
            .await?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn queue_collection(&self) -> Collection<MongoQueueDocument> {
        self.database()
            .await
            .collection::<MongoQueueDocument>(QUEUE_COLLECTION_NAME)
    }

    async fn tournament_collection(&self, shard: ShardId) -> Collection<MongoTournamentDocument> {
        self.database()
            .await
            .collection::<MongoTournamentDocument>(&tournament_collection_name(shard))
    }

    async fn result_collection(&self, shard: ShardId) -> Collection<MongoResultDocument> {
        self.database()
            .await
            .collection::<MongoResultDocument>(&result_collection_name(shard))
    }

    async fn bot_collection(&self) -> Collection<MongoBotDocument> {
        self.database()
            .await
            .collection::<MongoBotDocument>(BOT_COLLECTION_NAME)
    }

    async fn waiting_entries(
        &self,
        game_type: String,
        limit: Option<usize>,
    ) -> MongoResult<Vec<Versioned<QueueEntryEntity>>> {
        let collection = self.queue_collection().await;
        let read_error = |source| MongoDaoError::Read {
            collection: QUEUE_COLLECTION_NAME.to_owned(),
            source,
        };

        let mut find = collection
            .find(doc! {"game_type": game_type.as_str(), "status": "waiting"})
            .sort(doc! {"enqueued_at": 1, "_id": 1});
        if let Some(limit) = limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let documents: Vec<MongoQueueDocument> = find
            .await
            .map_err(read_error)?
            .try_collect()
            .await
            .map_err(read_error)?;

        documents
            .into_iter()
            .map(MongoQueueDocument::try_into_versioned)
            .collect()
    }

    async fn find_tournament(
        &self,
        shard: ShardId,
        id: Uuid,
    ) -> MongoResult<Option<Versioned<TournamentEntity>>> {
        let collection = self.tournament_collection(shard).await;
        collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: tournament_collection_name(shard),
                source,
            })?
            .map(MongoTournamentDocument::try_into_versioned)
            .transpose()
    }

    async fn find_user_tournament(
        &self,
        shard: ShardId,
        user_id: String,
    ) -> MongoResult<Option<Versioned<TournamentEntity>>> {
        let collection = self.tournament_collection(shard).await;
        collection
            .find_one(doc! {
                "players": user_id.as_str(),
                "status": {"$in": ["waiting", "active"]},
            })
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: tournament_collection_name(shard),
                source,
            })?
            .map(MongoTournamentDocument::try_into_versioned)
            .transpose()
    }

    async fn list_tournaments(
        &self,
        shard: ShardId,
        status: TournamentStatus,
    ) -> MongoResult<Vec<TournamentEntity>> {
        let collection = self.tournament_collection(shard).await;
        let read_error = |source| MongoDaoError::Read {
            collection: tournament_collection_name(shard),
            source,
        };

        let documents: Vec<MongoTournamentDocument> = collection
            .find(doc! {"status": status_name(status)})
            .await
            .map_err(read_error)?
            .try_collect()
            .await
            .map_err(read_error)?;

        documents
            .into_iter()
            .map(|document| document.try_into_versioned().map(|doc| doc.value))
            .collect()
    }

    async fn list_results(
        &self,
        shard: ShardId,
        tournament_id: Uuid,
    ) -> MongoResult<Vec<ResultEntity>> {
        let collection = self.result_collection(shard).await;
        let read_error = |source| MongoDaoError::Read {
            collection: result_collection_name(shard),
            source,
        };

        let documents: Vec<MongoResultDocument> = collection
            .find(doc! {"tournament_id": tournament_id.to_string()})
            .sort(doc! {"user_id": 1})
            .await
            .map_err(read_error)?
            .try_collect()
            .await
            .map_err(read_error)?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    /// Run the changeset inside one server-side transaction.
    async fn commit(&self, changeset: Changeset) -> MongoResult<()> {
        let client = self.client().await;
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Session { source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Session { source })?;

        match self.apply_in_session(&mut session, changeset).await {
            Ok(()) => session
                .commit_transaction()
                .await
                .map_err(MongoDaoError::from_commit),
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(error = %abort_err, "failed to abort MongoDB transaction");
                }
                Err(err)
            }
        }
    }

    async fn apply_in_session(
        &self,
        session: &mut ClientSession,
        changeset: Changeset,
    ) -> MongoResult<()> {
        for guard in &changeset.guards {
            self.check_guard(session, guard).await?;
        }
        for op in changeset.writes {
            self.apply_write(session, op).await?;
        }
        Ok(())
    }

    async fn check_guard(&self, session: &mut ClientSession, guard: &ReadGuard) -> MongoResult<()> {
        let (collection_name, id) = match &guard.key {
            DocKey::QueueEntry(id) => (QUEUE_COLLECTION_NAME.to_owned(), id.to_string()),
            DocKey::Tournament { shard, id } => (tournament_collection_name(*shard), id.to_string()),
        };
        let key = guard.key.to_string();
        let collection = self.database().await.collection::<Document>(&collection_name);

        let matching = collection
            .count_documents(at_version(&id, guard.version))
            .session(&mut *session)
            .await
            .map_err(|source| MongoDaoError::from_write(&collection_name, &key, source))?;

        if matching == 0 {
            return Err(MongoDaoError::Conflict { key });
        }
        Ok(())
    }

    async fn ensure_tournament_exists(
        &self,
        session: &mut ClientSession,
        shard: ShardId,
        tournament_id: Uuid,
    ) -> MongoResult<()> {
        let collection_name = tournament_collection_name(shard);
        let key = DocKey::Tournament {
            shard,
            id: tournament_id,
        }
        .to_string();
        let matching = self
            .tournament_collection(shard)
            .await
            .count_documents(doc_id(tournament_id))
            .session(&mut *session)
            .await
            .map_err(|source| MongoDaoError::from_write(&collection_name, &key, source))?;

        if matching == 0 {
            return Err(MongoDaoError::MissingDocument { key });
        }
        Ok(())
    }

    async fn apply_write(&self, session: &mut ClientSession, op: WriteOp) -> MongoResult<()> {
        match op {
            WriteOp::InsertQueueEntry(entry) => {
                let key = DocKey::QueueEntry(entry.id).to_string();
                let document = MongoQueueDocument::waiting(entry.id, entry.user_id, entry.game_type);
                self.queue_collection()
                    .await
                    .insert_one(&document)
                    .session(&mut *session)
                    .await
                    .map_err(|source| {
                        MongoDaoError::from_write(QUEUE_COLLECTION_NAME, &key, source)
                    })?;
                self.stamp_server_time(
                    session,
                    QUEUE_COLLECTION_NAME,
                    &document.id,
                    "enqueued_at",
                    &key,
                )
                .await?;
            }
            WriteOp::AssignQueueEntry {
                entry_id,
                tournament_id,
            } => {
                let key = DocKey::QueueEntry(entry_id).to_string();
                let result = self
                    .queue_collection()
                    .await
                    .update_one(
                        doc_id(entry_id),
                        doc! {
                            "$set": {
                                "status": "assigned",
                                "assigned_tournament_id": tournament_id.to_string(),
                            },
                            "$inc": {"version": 1_i64},
                        },
                    )
                    .session(&mut *session)
                    .await
                    .map_err(|source| {
                        MongoDaoError::from_write(QUEUE_COLLECTION_NAME, &key, source)
                    })?;
                if result.matched_count == 0 {
                    return Err(MongoDaoError::MissingDocument { key });
                }
            }
            WriteOp::InsertTournament { shard, tournament } => {
                let collection_name = tournament_collection_name(shard);
                let key = DocKey::Tournament {
                    shard,
                    id: tournament.id,
                }
                .to_string();
                let document = MongoTournamentDocument::waiting(
                    tournament.id,
                    tournament.game_type,
                    tournament.players,
                    tournament.max_players,
                    tournament.metadata,
                );
                self.tournament_collection(shard)
                    .await
                    .insert_one(&document)
                    .session(&mut *session)
                    .await
                    .map_err(|source| MongoDaoError::from_write(&collection_name, &key, source))?;
                self.stamp_server_time(session, &collection_name, &document.id, "created_at", &key)
                    .await?;
            }
            WriteOp::AddTournamentPlayers {
                shard,
                tournament_id,
                players,
            } => {
                let collection_name = tournament_collection_name(shard);
                let key = DocKey::Tournament {
                    shard,
                    id: tournament_id,
                }
                .to_string();
                // Pipeline update so the count is derived from the merged roster.
                let pipeline = vec![
                    doc! {"$set": {"players": {"$setUnion": ["$players", players]}}},
                    doc! {"$set": {
                        "player_count": {"$size": "$players"},
                        "version": {"$add": ["$version", 1_i64]},
                    }},
                ];
                let result = self
                    .tournament_collection(shard)
                    .await
                    .update_one(doc_id(tournament_id), pipeline)
                    .session(&mut *session)
                    .await
                    .map_err(|source| MongoDaoError::from_write(&collection_name, &key, source))?;
                if result.matched_count == 0 {
                    return Err(MongoDaoError::MissingDocument { key });
                }
            }
            WriteOp::StartTournament {
                shard,
                tournament_id,
            } => {
                let collection_name = tournament_collection_name(shard);
                let key = DocKey::Tournament {
                    shard,
                    id: tournament_id,
                }
                .to_string();
                let result = self
                    .tournament_collection(shard)
                    .await
                    .update_one(
                        doc_id(tournament_id),
                        doc! {
                            "$set": {"status": status_name(TournamentStatus::Active)},
                            "$currentDate": {"started_at": true},
                            "$inc": {"version": 1_i64},
                        },
                    )
                    .session(&mut *session)
                    .await
                    .map_err(|source| MongoDaoError::from_write(&collection_name, &key, source))?;
                if result.matched_count == 0 {
                    return Err(MongoDaoError::MissingDocument { key });
                }
            }
            WriteOp::PutResult {
                shard,
                tournament_id,
                result,
            } => {
                self.ensure_tournament_exists(session, shard, tournament_id)
                    .await?;
                let collection_name = result_collection_name(shard);
                let document = MongoResultDocument::submitted(
                    tournament_id,
                    result.user_id,
                    result.result,
                    result.is_bot,
                );
                let key = format!("{collection_name}/{}", document.id);
                self.result_collection(shard)
                    .await
                    .replace_one(doc! {"_id": document.id.as_str()}, &document)
                    .upsert(true)
                    .session(&mut *session)
                    .await
                    .map_err(|source| MongoDaoError::from_write(&collection_name, &key, source))?;
                self.stamp_server_time(
                    session,
                    &collection_name,
                    &document.id,
                    "submitted_at",
                    &key,
                )
                .await?;
            }
            WriteOp::InsertBot(bot) => {
                let key = format!("{BOT_COLLECTION_NAME}/{}", bot.id);
                let document = MongoBotDocument {
                    id: bot.id.to_string(),
                    name: bot.name,
                    game_type: bot.game_type,
                    difficulty: bot.difficulty,
                    is_bot: true,
                    tournament_id: bot.tournament_id.to_string(),
                    created_at: SERVER_TIME_PENDING,
                };
                self.bot_collection()
                    .await
                    .insert_one(&document)
                    .session(&mut *session)
                    .await
                    .map_err(|source| {
                        MongoDaoError::from_write(BOT_COLLECTION_NAME, &key, source)
                    })?;
                self.stamp_server_time(
                    session,
                    BOT_COLLECTION_NAME,
                    &document.id,
                    "created_at",
                    &key,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Overwrite `field` of a document written earlier in this transaction with the server clock.
    ///
    /// Queue order is first come, first served by `enqueued_at`, so it must not depend on
    /// the clocks of the application hosts.
    async fn stamp_server_time(
        &self,
        session: &mut ClientSession,
        collection_name: &str,
        id: &str,
        field: &str,
        key: &str,
    ) -> MongoResult<()> {
        let mut fields = Document::new();
        fields.insert(field, true);
        self.database()
            .await
            .collection::<Document>(collection_name)
            .update_one(doc! {"_id": id}, doc! {"$currentDate": fields})
            .session(&mut *session)
            .await
            .map_err(|source| MongoDaoError::from_write(collection_name, key, source))?;
        Ok(())
    }
}

/// Create `name` on `collection`; a `unique_when` filter makes it a unique partial index.
async fn create_index(
    database: &Database,
    collection: String,
    keys: Document,
    name: &'static str,
    unique_when: Option<Document>,
) -> MongoResult<()> {
    let options = IndexOptions::builder()
        .name(Some(name.to_owned()))
        .unique(unique_when.as_ref().map(|_| true))
        .partial_filter_expression(unique_when)
        .build();
    let index = IndexModel::builder().keys(keys).options(options).build();

    database
        .collection::<Document>(&collection)
        .create_index(index)
        .await
        .map_err(|source| MongoDaoError::EnsureIndex {
            collection,
            index: name,
            source,
        })?;
    Ok(())
}

impl TournamentStore for MongoTournamentStore {
    fn waiting_entries(
        &self,
        game_type: &str,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<QueueEntryEntity>>>> {
        let store = self.clone();
        let game_type = game_type.to_owned();
        Box::pin(async move {
            store
                .waiting_entries(game_type, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn find_tournament(
        &self,
        shard: ShardId,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>> {
        let store = self.clone();
        Box::pin(async move { store.find_tournament(shard, id).await.map_err(Into::into) })
    }

    fn find_user_tournament(
        &self,
        shard: ShardId,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>> {
        let store = self.clone();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            store
                .find_user_tournament(shard, user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_tournaments(
        &self,
        shard: ShardId,
        status: TournamentStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_tournaments(shard, status)
                .await
                .map_err(Into::into)
        })
    }

    fn list_results(
        &self,
        shard: ShardId,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_results(shard, tournament_id)
                .await
                .map_err(Into::into)
        })
    }

    fn commit(&self, changeset: Changeset) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(changeset).await.map_err(Into::into) })
    }

    fn batch_write(&self, writes: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let changeset = Changeset {
                guards: Vec::new(),
                writes,
            };
            store.commit(changeset).await.map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
