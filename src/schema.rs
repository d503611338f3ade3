/// Column-name constants for the chain table.
/// Single source of truth - exported to Python via PyO3.

// ── Chain columns ───────────────────────────────────────────────────────────
pub mod chain {
    pub const ID: &str = "id";
    pub const STRUCTURE_ID: &str = "pdb";
    pub const CHAIN_ID: &str = "chain";
    pub const LENGTH: &str = "length";
    pub const MOLECULE_TYPE: &str = "molecule_type";
    pub const NAME: &str = "name";
    pub const SEQUENCE: &str = "sequence";
    pub const LIGANDS: &str = "ligands";
    pub const SOURCE: &str = "source";
    pub const RESOLUTION: &str = "resolution";
    pub const DEPOSITION_DATE: &str = "deposition_date";
    pub const EXPERIMENT_TYPE: &str = "experiment_type";
    pub const SPLIT: &str = "split";

    /// Column order of every chain table.
    pub const ALL: [&str; 13] = [
        ID,
        STRUCTURE_ID,
        CHAIN_ID,
        LENGTH,
        MOLECULE_TYPE,
        NAME,
        SEQUENCE,
        LIGANDS,
        SOURCE,
        RESOLUTION,
        DEPOSITION_DATE,
        EXPERIMENT_TYPE,
        SPLIT,
    ];
}

// ── Split values ────────────────────────────────────────────────────────────
pub mod split {
    /// Split value of rows not assigned to any split.
    pub const UNASSIGNED: &str = "N/A";
}

// ── Molecule types ──────────────────────────────────────────────────────────
pub mod molecule_type {
    pub const PROTEIN: &str = "protein";
    pub const NUCLEIC_ACID: &str = "na";
}

// ── Experiment types ────────────────────────────────────────────────────────
pub mod experiment_type {
    pub const DIFFRACTION: &str = "diffraction";
    pub const NMR: &str = "NMR";
    pub const EM: &str = "EM";
    pub const OTHER: &str = "other";
}

// ── Sequence alphabet ───────────────────────────────────────────────────────
pub mod alphabet {
    /// The 20 standard amino-acid one-letter codes.
    pub const STANDARD_AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";
}
