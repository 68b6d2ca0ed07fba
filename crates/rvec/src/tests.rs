mod reclaim_tests;
