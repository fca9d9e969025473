use crate::config::{Settings, SECTION};
use crate::language::LanguageTexts;
use crate::lua::LuaIndex;
use crate::scanner::Dialect;
use crate::schema::SchemaIndex;
use crate::text::{Document, DocumentLanguage, DocumentStore};
use crate::variables::VariableTracker;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, error, info, warn};

pub struct Backend {
    pub(crate) client: Client,
    pub(crate) documents: Arc<DocumentStore>,
    pub(crate) dialects: Arc<DashMap<String, Dialect>>,
    pub(crate) variables: Arc<VariableTracker>,
    pub(crate) settings: RwLock<Arc<Settings>>,
    pub(crate) schema: RwLock<Arc<SchemaIndex>>,
    pub(crate) texts: RwLock<Arc<LanguageTexts>>,
    pub(crate) lua: RwLock<Arc<LuaIndex>>,
    pub(crate) ready: AtomicBool,
}

/// Everything read from the unpacked game files in one reload.
pub(crate) struct GameData {
    pub(crate) schema: SchemaIndex,
    pub(crate) texts: LanguageTexts,
    pub(crate) lua: LuaIndex,
}

impl GameData {
    fn load(settings: &Settings) -> crate::error::Result<Self> {
        let paths = settings.paths()?;
        let schema = SchemaIndex::load(&paths.schema(), &paths.libraries()).unwrap_or_else(|err| {
            error!("failed to load script properties: {err}");
            SchemaIndex::default()
        });
        let texts = LanguageTexts::load(
            &paths.language_folders(),
            &settings.language_number,
            settings.limit_language_output,
        );
        let lua = LuaIndex::load(&paths.ui());
        Ok(Self { schema, texts, lua })
    }
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(DocumentStore::default()),
            dialects: Arc::new(DashMap::new()),
            variables: Arc::new(VariableTracker::default()),
            settings: RwLock::new(Arc::new(Settings::default())),
            schema: RwLock::new(Arc::new(SchemaIndex::default())),
            texts: RwLock::new(Arc::new(LanguageTexts::default())),
            lua: RwLock::new(Arc::new(LuaIndex::default())),
            ready: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn verbose(&self) -> bool {
        self.settings.read().exceedingly_verbose
    }

    pub(crate) fn install(&self, data: GameData) {
        *self.schema.write() = Arc::new(data.schema);
        *self.texts.write() = Arc::new(data.texts);
        *self.lua.write() = Arc::new(data.lua);
        self.ready.store(true, Ordering::Release);
    }

    /// Asks the client for the settings section when it pushes none.
    async fn pull_settings(&self) -> Option<Value> {
        let items = vec![ConfigurationItem {
            scope_uri: None,
            section: Some(SECTION.to_string()),
        }];
        match self.client.configuration(items).await {
            Ok(values) => values.into_iter().next().filter(|value| !value.is_null()),
            Err(err) => {
                debug!("client did not provide configuration: {err}");
                None
            }
        }
    }

    /// Validates `settings` and reloads every game data index from disk.
    async fn apply_settings(&self, settings: Settings) {
        let settings = Arc::new(settings);
        *self.settings.write() = settings.clone();

        let missing = settings.missing();
        if !missing.is_empty() {
            self.ready.store(false, Ordering::Release);
            for name in missing {
                warn!("missing required setting {name}");
                self.client
                    .show_message(
                        MessageType::ERROR,
                        format!("Missing required setting: {name}. Please update your settings."),
                    )
                    .await;
            }
            return;
        }

        let loading = settings.clone();
        let loaded = tokio::task::spawn_blocking(move || GameData::load(&loading)).await;
        match loaded {
            Ok(Ok(data)) => {
                if data.texts.is_empty() {
                    warn!("no localized text found for language {}", settings.language_number);
                }
                if data.lua.is_empty() {
                    warn!("no Lua ffi definitions found");
                }
                let summary = format!(
                    "Loaded {} keywords, {} datatypes, {} localized texts and {} Lua functions",
                    data.schema.schema.keywords.len(),
                    data.schema.schema.datatypes.len(),
                    data.texts.len(),
                    data.lua.len()
                );
                self.install(data);
                info!("{summary}");
                self.client.log_message(MessageType::INFO, summary).await;
            }
            Ok(Err(err)) => {
                self.ready.store(false, Ordering::Release);
                error!("{err}");
                self.client.show_message(MessageType::ERROR, err.to_string()).await;
            }
            Err(err) => {
                self.ready.store(false, Ordering::Release);
                error!("loading game data panicked: {err}");
            }
        }
    }

    pub(crate) fn update_document(&self, uri: &Url, text: String, language: Option<DocumentLanguage>) {
        let key = uri.to_string();
        let language = language
            .or_else(|| self.documents.get(&key).map(|doc| doc.language()))
            .unwrap_or_else(|| DocumentLanguage::from_path(uri.path()));
        self.documents.insert(key, Document::new(text, language));
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if let Some(options) = params.initialization_options {
            match Settings::from_value(options) {
                Ok(settings) => *self.settings.write() = Arc::new(settings),
                Err(err) => warn!("ignoring initialization options: {err}"),
            }
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![".".into(), "\"".into(), "{".into()]),
                    ..CompletionOptions::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                rename_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "X4 script language server initialized")
            .await;

        let mut settings = (**self.settings.read()).clone();
        if !settings.missing().is_empty() {
            if let Some(value) = self.pull_settings().await {
                match Settings::from_value(value) {
                    Ok(pulled) => settings = pulled,
                    Err(err) => warn!("ignoring client configuration: {err}"),
                }
            }
        }
        self.apply_settings(settings).await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let value = match params.settings {
            Value::Null => self.pull_settings().await.unwrap_or(Value::Null),
            value => value,
        };
        match Settings::from_value(value) {
            Ok(settings) => {
                info!("configuration changed, reloading");
                self.apply_settings(settings).await;
            }
            Err(err) => {
                warn!("{err}");
                self.client.show_message(MessageType::ERROR, err.to_string()).await;
            }
        }
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let language = DocumentLanguage::from_language_id(&params.text_document.language_id);

        self.update_document(&uri, params.text_document.text, Some(language));
        self.dialects.remove(uri.as_str());
        self.analyze_document(&uri);

        self.client
            .log_message(MessageType::INFO, format!("Opened document: {}", uri))
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;

        if let Some(change) = params.content_changes.into_iter().last() {
            self.update_document(&uri, change.text, None);
            self.analyze_document(&uri);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;

        if let Some(text) = params.text {
            self.update_document(&uri, text, None);
        }
        self.analyze_document(&uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;

        self.documents.remove(uri.as_str());
        self.dialects.remove(uri.as_str());
        self.variables.clear(&uri);
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        Ok(self.completion_at(&uri, position))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        Ok(self.hover_at(&uri, position))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        Ok(self
            .definition_at(&uri, position)
            .map(GotoDefinitionResponse::Scalar))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        Ok(self.references_at(&uri, position))
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let new_name = params.new_name;

        if new_name.is_empty() {
            return Ok(None);
        }

        Ok(self.rename_at(&uri, position, &new_name))
    }
}
