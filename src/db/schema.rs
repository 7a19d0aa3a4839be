use diesel::table;

table! {
    instruments (id) {
        id -> Integer,
        isin -> Text,
        cusip -> Nullable<Text>,
        broker_id -> Nullable<Text>,
        figi -> Nullable<Text>,
        name -> Nullable<Text>,
        asset_category -> Nullable<Text>,
        venue -> Nullable<Text>,
        currency -> Nullable<Text>,
        multiplier -> Text,
        enrichment -> Nullable<Text>,
    }
}

table! {
    instrument_aliases (id) {
        id -> Integer,
        instrument_id -> Integer,
        symbol -> Text,
        venue -> Text,
        source -> Text,
        valid_from -> Nullable<Date>,
        valid_to -> Nullable<Date>,
        is_primary -> Bool,
    }
}

table! {
    trades (id) {
        id -> Integer,
        external_id -> Text,
        instrument_id -> Integer,
        date -> Date,
        settlement_date -> Nullable<Date>,
        quantity -> Text,
        price -> Nullable<Text>,
        amount -> Text,
        commission -> Nullable<Text>,
        currency -> Text,
        currency_rate -> Nullable<Text>,
        raw_data -> Text,
    }
}

table! {
    dividends (id) {
        id -> Integer,
        external_id -> Text,
        instrument_id -> Integer,
        date -> Date,
        ex_date -> Nullable<Date>,
        currency -> Text,
        gross_amount -> Text,
        withheld_tax -> Text,
        net_amount -> Text,
        per_share -> Nullable<Text>,
        currency_rate -> Nullable<Text>,
        base_amount -> Nullable<Text>,
        raw_data -> Text,
    }
}

table! {
    cash_flows (id) {
        id -> Integer,
        external_id -> Text,
        flow_type -> Text,
        date -> Date,
        amount -> Text,
        currency -> Text,
        currency_rate -> Nullable<Text>,
        base_amount -> Nullable<Text>,
        raw_data -> Text,
    }
}

table! {
    corporate_actions (id) {
        id -> Integer,
        external_id -> Text,
        instrument_id -> Nullable<Integer>,
        action_type -> Text,
        date -> Date,
        quantity -> Nullable<Text>,
        amount -> Nullable<Text>,
        proceeds -> Nullable<Text>,
        raw_data -> Text,
    }
}

table! {
    currency_rates (currency, date) {
        currency -> Text,
        date -> Date,
        rate -> Text,
    }
}

table! {
    snapshots (id) {
        id -> Integer,
        date -> Date,
        total_value -> Text,
        reported_value -> Nullable<Text>,
        currency -> Text,
    }
}

table! {
    positions (id) {
        id -> Integer,
        external_id -> Text,
        snapshot_id -> Integer,
        instrument_id -> Nullable<Integer>,
        symbol -> Text,
        isin -> Nullable<Text>,
        quantity -> Text,
        price -> Nullable<Text>,
        value -> Text,
        currency -> Text,
        currency_rate -> Nullable<Text>,
        raw_data -> Text,
    }
}

diesel::joinable!(instrument_aliases -> instruments (instrument_id));
diesel::joinable!(trades -> instruments (instrument_id));
diesel::joinable!(dividends -> instruments (instrument_id));
diesel::joinable!(corporate_actions -> instruments (instrument_id));
diesel::joinable!(positions -> snapshots (snapshot_id));
diesel::joinable!(positions -> instruments (instrument_id));

diesel::allow_tables_to_appear_in_same_query!(
    instruments,
    instrument_aliases,
    trades,
    dividends,
    cash_flows,
    corporate_actions,
    currency_rates,
    snapshots,
    positions,
);
