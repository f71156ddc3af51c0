//! Onboarding session state machine.

use serde::{Deserialize, Serialize};

use crate::channels::{CallbackData, Command, Input};
use crate::model::User;

/// Where a user is in the onboarding dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No dialog in progress and no enrollment.
    Idle,
    /// Waiting for a city name, a location, or a pick from the candidate
    /// list.
    AwaitingCityName,
    /// A city lookup is in flight. Blocks further city input.
    SearchingCity,
    /// City saved; waiting for the unit choice.
    AwaitingUnitSelection,
    /// Setup complete; receives broadcasts.
    Enrolled,
}

impl SessionState {
    /// Next state for `shape`, or `None` when the input is not accepted
    /// here.
    pub fn next(&self, shape: InputShape) -> Option<SessionState> {
        use InputShape as I;
        use SessionState::*;

        match (self, shape) {
            // Accepted in every state
            (_, I::Start) => Some(AwaitingCityName),
            (_, I::Stop) => Some(Idle),
            (state, I::About | I::Stats) => Some(*state),
            // City prompt
            (AwaitingCityName, I::CityText | I::Location) => Some(SearchingCity),
            (SearchingCity, I::SearchResolved) => Some(AwaitingCityName),
            // Candidate list
            (AwaitingCityName, I::PickCandidate) => Some(AwaitingUnitSelection),
            (AwaitingCityName, I::ChooseAnotherCity) => Some(AwaitingCityName),
            // Units
            (AwaitingUnitSelection, I::UnitChoice) => Some(Enrolled),
            _ => None,
        }
    }

    pub fn accepts(&self, shape: InputShape) -> bool {
        self.next(shape).is_some()
    }

    /// Whether the user is somewhere inside the onboarding dialog.
    pub fn is_onboarding(&self) -> bool {
        matches!(
            self,
            Self::AwaitingCityName | Self::SearchingCity | Self::AwaitingUnitSelection
        )
    }

    /// Best reconstruction of the state from a stored row, used when the
    /// in-memory session was lost.
    pub fn recover(user: Option<&User>) -> Self {
        match user {
            None => Self::Idle,
            Some(user) if user.awaiting_city => Self::AwaitingCityName,
            Some(user) if user.is_enrolled() => Self::Enrolled,
            Some(user) if user.has_location() => Self::AwaitingUnitSelection,
            Some(_) => Self::Idle,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingCityName => "awaiting_city_name",
            Self::SearchingCity => "searching_city",
            Self::AwaitingUnitSelection => "awaiting_unit_selection",
            Self::Enrolled => "enrolled",
        };
        write!(f, "{s}")
    }
}

/// The kind of input, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputShape {
    Start,
    Stop,
    About,
    Stats,
    CityText,
    Location,
    /// Internal: the in-flight lookup finished, with or without results.
    SearchResolved,
    PickCandidate,
    ChooseAnotherCity,
    UnitChoice,
    Unrecognized,
}

impl InputShape {
    pub fn of(input: &Input) -> Self {
        match input {
            Input::Command(Command::Start) => Self::Start,
            Input::Command(Command::Stop) => Self::Stop,
            Input::Command(Command::About) => Self::About,
            Input::Command(Command::Stats) => Self::Stats,
            Input::CityName(_) => Self::CityText,
            Input::Coordinates { .. } => Self::Location,
            Input::Button(CallbackData::PickCity { .. }) => Self::PickCandidate,
            Input::Button(CallbackData::AnotherCity) => Self::ChooseAnotherCity,
            Input::Button(CallbackData::Units(_)) => Self::UnitChoice,
            Input::Unrecognized => Self::Unrecognized,
        }
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::About => "about",
            Self::Stats => "stats",
            Self::CityText => "city_text",
            Self::Location => "location",
            Self::SearchResolved => "search_resolved",
            Self::PickCandidate => "pick_candidate",
            Self::ChooseAnotherCity => "choose_another_city",
            Self::UnitChoice => "unit_choice",
            Self::Unrecognized => "unrecognized",
        };
        write!(f, "{s}")
    }
}

/// In-memory session for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub state: SessionState,
    /// Bumped on every start and stop; a lookup started under an older
    /// epoch is stale.
    pub epoch: u64,
}

impl Session {
    pub fn new(state: SessionState) -> Self {
        Self { state, epoch: 0 }
    }
}
