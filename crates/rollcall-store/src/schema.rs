//! SQLite schema. Times and dates are zero-padded ISO text, so lexicographic
//! comparison in SQL matches chronological order.

pub const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS courses (
    id      INTEGER PRIMARY KEY,
    name    TEXT NOT NULL UNIQUE,
    active  INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS semesters (
    id      INTEGER PRIMARY KEY,
    name    TEXT NOT NULL UNIQUE,
    active  INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS identities (
    id             INTEGER PRIMARY KEY,
    name           TEXT NOT NULL,
    roll_no        TEXT NOT NULL UNIQUE,
    department_id  INTEGER NOT NULL,
    course_id      INTEGER NOT NULL,
    session_id     INTEGER NOT NULL,
    semester_id    INTEGER NOT NULL,
    authorized     INTEGER NOT NULL DEFAULT 0,
    active         INTEGER NOT NULL DEFAULT 1,
    embedding      TEXT
);

CREATE TABLE IF NOT EXISTS attendance (
    id              INTEGER PRIMARY KEY,
    identity_id     INTEGER NOT NULL REFERENCES identities(id),
    date            TEXT NOT NULL,
    check_in        TEXT,
    check_out       TEXT,
    status          TEXT NOT NULL CHECK (status IN ('present', 'late', 'absent')),
    manually_marked INTEGER NOT NULL DEFAULT 0,
    UNIQUE (identity_id, date)
);

CREATE TABLE IF NOT EXISTS policy (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    present_cutoff TEXT NOT NULL,
    late_cutoff    TEXT NOT NULL,
    CHECK (present_cutoff < late_cutoff)
);

CREATE TABLE IF NOT EXISTS leaves (
    id          INTEGER PRIMARY KEY,
    identity_id INTEGER NOT NULL REFERENCES identities(id),
    start_date  TEXT NOT NULL,
    end_date    TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected'))
);

CREATE TABLE IF NOT EXISTS operators (
    id            INTEGER PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    salt          TEXT NOT NULL,
    is_admin      INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";
