//! Idempotent schema bootstrap. Additive changes only: new columns and
//! tables arrive guarded by `IF NOT EXISTS`, existing columns are never
//! altered.

pub(crate) const SCHEMA_STATEMENTS: &[&str] = &[
    // One row per discovered record file. AUTOINCREMENT keeps file ids
    // monotonic and stable even across deletes.
    "CREATE TABLE IF NOT EXISTS raw_files (
        file_id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        file_type TEXT NOT NULL,
        migration_id INTEGER,
        record_date TEXT,
        record_count INTEGER NOT NULL DEFAULT 0,
        min_ts TEXT,
        max_ts TEXT,
        ingested INTEGER NOT NULL DEFAULT 0,
        ingested_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_raw_files_pending
        ON raw_files (ingested, record_date, file_id)",
    // Raw decoded records, append-only within a file's ingestion.
    "CREATE TABLE IF NOT EXISTS events_raw (
        event_id TEXT,
        update_id TEXT,
        contract_id TEXT,
        template_id TEXT,
        event_type TEXT,
        consuming INTEGER,
        choice TEXT,
        effective_at TEXT,
        recorded_at TEXT,
        signatories TEXT,
        observers TEXT,
        acting_parties TEXT,
        payload TEXT,
        exercise_argument TEXT,
        exercise_result TEXT,
        synchronizer_id TEXT,
        _file_id INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_raw_file ON events_raw (_file_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_raw_recorded ON events_raw (recorded_at)",
    "CREATE INDEX IF NOT EXISTS idx_events_raw_template ON events_raw (template_id)",
    "CREATE TABLE IF NOT EXISTS updates_raw (
        event_id TEXT,
        update_id TEXT,
        contract_id TEXT,
        template_id TEXT,
        event_type TEXT,
        consuming INTEGER,
        choice TEXT,
        effective_at TEXT,
        recorded_at TEXT,
        signatories TEXT,
        observers TEXT,
        acting_parties TEXT,
        payload TEXT,
        exercise_argument TEXT,
        exercise_result TEXT,
        synchronizer_id TEXT,
        _file_id INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_updates_raw_file ON updates_raw (_file_id)",
    "CREATE INDEX IF NOT EXISTS idx_updates_raw_recorded ON updates_raw (recorded_at)",
    // Per-aggregation watermark: last file id accounted for.
    "CREATE TABLE IF NOT EXISTS aggregation_state (
        agg_name TEXT PRIMARY KEY,
        last_file_id INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS event_type_counts (
        event_type TEXT PRIMARY KEY,
        event_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS daily_activity (
        day TEXT PRIMARY KEY,
        event_count INTEGER NOT NULL DEFAULT 0
    )",
    // Template→file inverted index.
    "CREATE TABLE IF NOT EXISTS template_file_index (
        file_path TEXT NOT NULL,
        template_name TEXT NOT NULL,
        event_count INTEGER NOT NULL,
        first_event_at TEXT,
        last_event_at TEXT
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_template_file_unique
        ON template_file_index (file_path, template_name)",
    "CREATE INDEX IF NOT EXISTS idx_template_file_name
        ON template_file_index (template_name)",
    "CREATE TABLE IF NOT EXISTS template_file_index_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_indexed_at TEXT,
        total_files_indexed INTEGER NOT NULL DEFAULT 0,
        total_templates_found INTEGER NOT NULL DEFAULT 0,
        build_duration_seconds REAL NOT NULL DEFAULT 0
    )",
    // Vote-request projection.
    "CREATE TABLE IF NOT EXISTS vote_requests (
        event_id TEXT PRIMARY KEY,
        stable_id TEXT NOT NULL,
        contract_id TEXT,
        status TEXT NOT NULL,
        is_closed INTEGER NOT NULL DEFAULT 0,
        action_tag TEXT,
        action_subject TEXT,
        proposal_id TEXT NOT NULL,
        semantic_key TEXT NOT NULL,
        is_human INTEGER NOT NULL DEFAULT 0,
        requester TEXT,
        reason_body TEXT,
        reason_url TEXT,
        votes TEXT,
        accept_count INTEGER NOT NULL DEFAULT 0,
        reject_count INTEGER NOT NULL DEFAULT 0,
        vote_before TEXT,
        effective_at TEXT,
        tracking_cid TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_vote_requests_proposal
        ON vote_requests (proposal_id)",
    "CREATE INDEX IF NOT EXISTS idx_vote_requests_semantic
        ON vote_requests (semantic_key)",
    "CREATE INDEX IF NOT EXISTS idx_vote_requests_status
        ON vote_requests (status)",
    "CREATE TABLE IF NOT EXISTS vote_request_builds (
        build_id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        create_events INTEGER NOT NULL DEFAULT 0,
        terminal_events INTEGER NOT NULL DEFAULT 0,
        rows_written INTEGER NOT NULL DEFAULT 0,
        named_payloads INTEGER NOT NULL DEFAULT 0,
        positional_payloads INTEGER NOT NULL DEFAULT 0,
        unknown_choices INTEGER NOT NULL DEFAULT 0,
        missing_roots INTEGER NOT NULL DEFAULT 0,
        success INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )",
    // Interval projections.
    "CREATE TABLE IF NOT EXISTS sv_intervals (
        contract_id TEXT PRIMARY KEY,
        sv_party TEXT NOT NULL,
        sv_name TEXT,
        sv_reward_weight INTEGER,
        sv_participant_id TEXT,
        active_from TEXT NOT NULL,
        active_until TEXT,
        dso TEXT,
        reason TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sv_intervals_window
        ON sv_intervals (active_from, active_until)",
    "CREATE TABLE IF NOT EXISTS dso_rules_intervals (
        contract_id TEXT PRIMARY KEY,
        dso TEXT,
        active_from TEXT NOT NULL,
        active_until TEXT
    )",
    // Reward coupon projection.
    "CREATE TABLE IF NOT EXISTS reward_coupons (
        event_id TEXT PRIMARY KEY,
        contract_id TEXT,
        template_id TEXT,
        effective_at TEXT,
        round INTEGER NOT NULL,
        coupon_type TEXT NOT NULL,
        beneficiary TEXT,
        weight REAL NOT NULL DEFAULT 0,
        cc_amount REAL NOT NULL DEFAULT 0,
        has_issuance_data INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_reward_coupons_beneficiary
        ON reward_coupons (beneficiary)",
    "CREATE INDEX IF NOT EXISTS idx_reward_coupons_round
        ON reward_coupons (round)",
];
