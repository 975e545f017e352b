use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Irregularities met while answering a query
    pub struct Anomalies : u16 {
        /// The object, type, protocol or composition address was zero
        const NULL_ADDRESS = 0x0001;
        /// No layout table was available
        const UNRESOLVED = 0x0002;
        /// A read was refused by the memory source
        const INVALID_READ = 0x0004;
        /// The object header held a null type descriptor
        const NULL_TYPE = 0x0008;
        /// The superclass chain was longer than the hop limit
        const HOP_LIMIT = 0x0010;
        /// The superclass chain loops back onto itself
        const CYCLE = 0x0020;
        /// Incorporated interface lists were nested deeper than the depth limit
        const DEPTH_LIMIT = 0x0040;
        /// A list declared more records than the list entry limit
        const LIST_TOO_LONG = 0x0080;
        /// The per-query record budget ran out
        const BUDGET_EXHAUSTED = 0x0100;
        /// The composition metadata has the wrong kind or the runtime has no compositions
        const NOT_A_COMPOSITION = 0x0200;
    }
}

/// Answer to a conformance query, with the irregularities met on the way.
///
/// The anomalies never change the meaning of the answer: a query that found a match is a match
/// no matter what else went wrong, and a query that did not is "no conformance found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Verdict {
    conforms: bool,
    anomalies: Anomalies,
}

impl Verdict {
    /// Create a verdict.
    #[must_use]
    pub const fn new(conforms: bool, anomalies: Anomalies) -> Verdict {
        Verdict {
            conforms,
            anomalies,
        }
    }

    /// A negative verdict caused solely by `anomaly`.
    #[must_use]
    pub const fn rejected(anomaly: Anomalies) -> Verdict {
        Verdict::new(false, anomaly)
    }

    /// Whether conformance was found.
    #[must_use]
    pub const fn conforms(&self) -> bool {
        self.conforms
    }

    /// Irregularities met while answering.
    #[must_use]
    pub const fn anomalies(&self) -> Anomalies {
        self.anomalies
    }

    /// Returns `true` if the walk met no irregularity.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

impl From<Verdict> for bool {
    fn from(verdict: Verdict) -> bool {
        verdict.conforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict() {
        let clean = Verdict::new(true, Anomalies::empty());
        assert!(clean.conforms());
        assert!(clean.is_clean());
        assert!(bool::from(clean));

        let rejected = Verdict::rejected(Anomalies::UNRESOLVED);
        assert!(!rejected.conforms());
        assert!(!rejected.is_clean());
        assert_eq!(rejected.anomalies(), Anomalies::UNRESOLVED);
    }

    #[test]
    fn anomalies_combine() {
        let anomalies = Anomalies::CYCLE | Anomalies::INVALID_READ;
        let verdict = Verdict::new(true, anomalies);

        assert!(verdict.conforms());
        assert!(verdict.anomalies().contains(Anomalies::CYCLE));
        assert!(!verdict.anomalies().contains(Anomalies::HOP_LIMIT));
    }
}
